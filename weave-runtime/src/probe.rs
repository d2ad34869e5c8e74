//! `Debug` rendering for values of arbitrary type.
//!
//! Woven code does not know whether an argument type implements `Debug`.
//! [`render!`](crate::render) resolves that per call site with autoref
//! specialization: `ViaDebug` is implemented for `Probe<T: Debug>` and wins
//! method lookup at the first autoref step; `ViaOpaque` is implemented for
//! `&Probe<T>` for every `T` and is only reached when `T: Debug` does not hold.

use std::fmt::Debug;

pub struct Probe<'a, T: ?Sized>(pub &'a T);

pub trait ViaDebug {
    fn render(&self) -> Option<String>;
}

impl<T: Debug + ?Sized> ViaDebug for Probe<'_, T> {
    fn render(&self) -> Option<String> {
        Some(format!("{:?}", self.0))
    }
}

pub trait ViaOpaque {
    fn render(&self) -> Option<String>;
}

impl<T: ?Sized> ViaOpaque for &Probe<'_, T> {
    fn render(&self) -> Option<String> {
        None
    }
}

/// `Some(format!("{:?}", value))` if the value's type is `Debug`, else `None`.
/// Borrows `value`; never moves it.
#[macro_export]
macro_rules! render {
    ($value:expr) => {{
        #[allow(unused_imports)]
        use $crate::probe::{ViaDebug as _, ViaOpaque as _};
        (&$crate::probe::Probe(&$value)).render()
    }};
}
