//! Runtime support for code rewritten by `weave`.
//!
//! Every woven function carries a `static` [`HookSlot`] that resolves its
//! [`Hooks`] on first call, snapshots the call into a [`Call`], runs the
//! original body inside [`guarded`], and reports the [`Outcome`] to the
//! post-hook before returning (or re-raising the panic).
//!
//! Hooks run inside [`in_hook`]: woven functions they call run unhooked.

mod diagnostic;
mod hooks;
#[doc(hidden)]
pub mod probe;
mod reentry;
mod resolver;
mod slot;

use std::any::Any;

pub use diagnostic::{
    Diagnostic, DiagnosticKind, argument_not_overridable, emit, mismatched_argument,
    mismatched_return, reset_diagnostic_handler, return_not_replaceable, set_diagnostic_handler,
    unexpected_argument,
};
pub use hooks::{
    Arg, ArgKey, Call, Hooks, Outcome, Override, PostHook, PreHook, Returned, Target,
};
pub use reentry::{in_hook, is_in_hook};
pub use resolver::{Resolver, install, install_resolver, is_installed, resolve};
pub use slot::HookSlot;

/// Run `body`, catching an unwinding panic so the caller can report it
/// before re-raising it with [`std::panic::resume_unwind`].
///
/// The explicit `R` parameter lets woven code pin the closure's return type
/// to the function's declared return type.
#[inline]
pub fn guarded<R, F: FnOnce() -> R>(body: F) -> std::thread::Result<R> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(body))
}

/// Address of the value behind `value`, used as a stable instance identity
/// for the duration of a call.
#[inline]
pub fn address_of<T: ?Sized>(value: &T) -> usize {
    (value as *const T).cast::<()>() as usize
}

/// Best-effort message of a panic payload (`&str` or `String` payloads).
pub fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return Some(s);
    }
    payload.downcast_ref::<String>().map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_passes_value_through() {
        let result = guarded::<u32, _>(|| 40 + 2);
        assert_eq!(result.ok(), Some(42));
    }

    #[test]
    fn guarded_captures_panic_payload() {
        let result = guarded::<(), _>(|| std::panic::panic_any(7u8));
        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<u8>(), Some(&7));
    }

    #[test]
    fn guarded_preserves_reference_identity() {
        let mut storage = vec![1, 2, 3];
        let ptr = std::ptr::addr_of!(storage) as usize;
        let r = guarded::<&mut Vec<i32>, _>(|| &mut storage).unwrap();
        assert_eq!(address_of(r), ptr);
        r.push(4);
        assert_eq!(storage, [1, 2, 3, 4]);
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let a: Box<dyn Any + Send> = Box::new("boom");
        let b: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let c: Box<dyn Any + Send> = Box::new(5i32);
        assert_eq!(panic_message(&*a), Some("boom"));
        assert_eq!(panic_message(&*b), Some("bang"));
        assert_eq!(panic_message(&*c), None);
    }
}
