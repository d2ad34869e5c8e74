//! Per-thread marker for "a hook is running".
//!
//! While a hook, the resolver, or an argument snapshot runs, every woven
//! function on the same thread behaves as if it had no hooks. A hook that
//! calls woven code (its own helpers, a woven `Debug` impl, a post hook
//! declared in a woven module) therefore cannot re-enter itself.

use std::cell::Cell;

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside [`in_hook`].
#[inline]
pub fn is_in_hook() -> bool {
    IN_HOOK.with(Cell::get)
}

/// Run `f` with hooks suspended on this thread. The previous state is
/// restored on return and on unwind.
#[inline]
pub fn in_hook<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(bool);
    impl Drop for Restore {
        fn drop(&mut self) {
            IN_HOOK.with(|flag| flag.set(self.0));
        }
    }
    let _restore = Restore(IN_HOOK.with(|flag| flag.replace(true)));
    f()
}
