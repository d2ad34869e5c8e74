use std::sync::OnceLock;

use crate::hooks::Hooks;

/// Maps a function identity to its hook pair.
///
/// Implemented for every `Fn(Option<&str>, &str) -> Option<Hooks>` closure.
pub trait Resolver: Send + Sync {
    fn resolve(&self, class: Option<&str>, function: &str) -> Option<Hooks>;
}

impl<F> Resolver for F
where
    F: Fn(Option<&str>, &str) -> Option<Hooks> + Send + Sync,
{
    fn resolve(&self, class: Option<&str>, function: &str) -> Option<Hooks> {
        self(class, function)
    }
}

static INSTALLED: OnceLock<Box<dyn Resolver>> = OnceLock::new();

/// Install the process-wide resolver consulted by [`resolve`].
///
/// Returns `false` if a resolver was already installed; the first one stays.
/// Functions called before installation cache the empty pair for good, so
/// install early in `main`.
pub fn install<F>(resolver: F) -> bool
where
    F: Fn(Option<&str>, &str) -> Option<Hooks> + Send + Sync + 'static,
{
    install_resolver(resolver)
}

/// [`install`] for resolvers that are not closures.
pub fn install_resolver<R: Resolver + 'static>(resolver: R) -> bool {
    INSTALLED.set(Box::new(resolver)).is_ok()
}

pub fn is_installed() -> bool {
    INSTALLED.get().is_some()
}

/// Default hook resolver named in woven code.
///
/// Delegates to the installed resolver, or answers "not instrumented" when
/// none is installed.
pub fn resolve(class: Option<&'static str>, function: &'static str) -> Option<Hooks> {
    INSTALLED.get()?.resolve(class, function)
}
