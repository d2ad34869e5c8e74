//! Non-fatal diagnostics raised by woven code.
//!
//! A bad override or replacement never fails the call: the offending value
//! is dropped, the original value is kept, and one [`Diagnostic`] is emitted.
//! By default diagnostics are written to stderr; tests and hosts with their
//! own logging install a handler with [`set_diagnostic_handler`].

use std::fmt;
use std::sync::RwLock;

use crate::hooks::{ArgKey, Call};

type Handler = Box<dyn Fn(&Diagnostic) + Send + Sync>;

static HANDLER: RwLock<Option<Handler>> = RwLock::new(None);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Override key matches no declared parameter.
    UnexpectedArgument,
    /// Override key matches a parameter that cannot be rebound (borrowed,
    /// generic, or bound by a pattern).
    ArgumentNotOverridable,
    /// Override value has a different type than the parameter.
    MismatchedArgument,
    /// Post-hook replacement for a return type that cannot be downcast.
    ReturnNotReplaceable,
    /// Post-hook replacement has a different type than the return value.
    MismatchedReturn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub class: Option<&'static str>,
    pub function: &'static str,
    pub key: Option<ArgKey>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.class {
            Some(class) => format!("{class}::{}", self.function),
            None => self.function.to_string(),
        };
        let key = self.key.as_ref().map(ToString::to_string).unwrap_or_default();
        match self.kind {
            DiagnosticKind::UnexpectedArgument => {
                write!(f, "unexpected argument \"{key}\" for {name}")
            }
            DiagnosticKind::ArgumentNotOverridable => {
                write!(f, "argument \"{key}\" of {name} cannot be overridden")
            }
            DiagnosticKind::MismatchedArgument => {
                write!(f, "override for argument \"{key}\" of {name} has the wrong type")
            }
            DiagnosticKind::ReturnNotReplaceable => {
                write!(f, "return value of {name} cannot be replaced")
            }
            DiagnosticKind::MismatchedReturn => {
                write!(f, "replacement return value for {name} has the wrong type")
            }
        }
    }
}

/// Route diagnostics to `handler` instead of stderr.
pub fn set_diagnostic_handler<F>(handler: F)
where
    F: Fn(&Diagnostic) + Send + Sync + 'static,
{
    *HANDLER.write().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(handler));
}

/// Restore the default stderr handler.
pub fn reset_diagnostic_handler() {
    *HANDLER.write().unwrap_or_else(|e| e.into_inner()) = None;
}

pub fn emit(diagnostic: Diagnostic) {
    let handler = HANDLER.read().unwrap_or_else(|e| e.into_inner());
    match handler.as_ref() {
        Some(handler) => handler(&diagnostic),
        None => eprintln!("weave: {diagnostic}"),
    }
}

fn emit_for(kind: DiagnosticKind, call: &Call, key: Option<&ArgKey>) {
    emit(Diagnostic {
        kind,
        class: call.class,
        function: call.function,
        key: key.cloned(),
    });
}

pub fn unexpected_argument(call: &Call, key: &ArgKey) {
    emit_for(DiagnosticKind::UnexpectedArgument, call, Some(key));
}

pub fn argument_not_overridable(call: &Call, key: &ArgKey) {
    emit_for(DiagnosticKind::ArgumentNotOverridable, call, Some(key));
}

pub fn mismatched_argument(call: &Call, key: &ArgKey) {
    emit_for(DiagnosticKind::MismatchedArgument, call, Some(key));
}

pub fn return_not_replaceable(call: &Call) {
    emit_for(DiagnosticKind::ReturnNotReplaceable, call, None);
}

pub fn mismatched_return(call: &Call) {
    emit_for(DiagnosticKind::MismatchedReturn, call, None);
}
