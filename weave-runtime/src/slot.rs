//! Per-function hook resolution cache.
//!
//! Each woven function declares its own `static` slot, so the slot identity
//! is the function identity fixed at weave time. The slot is filled on the
//! first call, not at load time, and is never re-queried afterwards.
//!
//! Filling does not hold a lock while the resolver runs: the resolver result
//! is computed first and then offered to the cell. Two threads racing on the
//! first call may both resolve; the first stored pair wins and the other is
//! dropped. Resolution is a pure function of identity, so both are equal.
//!
//! Inside a hook or the resolver every slot answers with the empty pair and
//! is left untouched, so it resolves normally on its first call outside.

use std::sync::OnceLock;

use crate::hooks::Hooks;
use crate::reentry::{in_hook, is_in_hook};

static INERT: Hooks = Hooks {
    pre: None,
    post: None,
};

pub struct HookSlot {
    hooks: OnceLock<Hooks>,
}

impl HookSlot {
    pub const fn new() -> Self {
        Self {
            hooks: OnceLock::new(),
        }
    }

    /// Return the cached pair, resolving it with `resolve` on first use.
    /// A resolver answer of `None` is cached as the empty pair.
    #[inline]
    pub fn get_or_resolve<F>(&self, resolve: F) -> &Hooks
    where
        F: FnOnce() -> Option<Hooks>,
    {
        if is_in_hook() {
            return &INERT;
        }
        if let Some(hooks) = self.hooks.get() {
            return hooks;
        }
        let resolved = in_hook(resolve).unwrap_or_default();
        self.hooks.get_or_init(move || resolved)
    }

    /// The cached pair, if this slot has been resolved.
    pub fn get(&self) -> Option<&Hooks> {
        self.hooks.get()
    }
}

impl Default for HookSlot {
    fn default() -> Self {
        Self::new()
    }
}
