use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(Option<&str>, &str) -> bool + Send + Sync>;

/// Decides, per function identity, whether the function is wrapped.
///
/// Evaluated once per function at weave time, never at run time. The
/// predicate is fixed at construction.
#[derive(Clone, Default)]
pub struct Filter {
    predicate: Option<Predicate>,
}

/// One selection rule from the command line or `[package.metadata.weave]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Substring match against the bare function or method name (--fn).
    Fn(String),
    /// Exact match against the class name, with or without its module
    /// path (--class).
    Class(String),
    /// Everything defined in a module or its submodules (--mod).
    Mod(String),
}

impl Filter {
    /// Accept every function.
    pub fn all() -> Self {
        Self { predicate: None }
    }

    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(Option<&str>, &str) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Arc::new(predicate)),
        }
    }

    /// Build a filter from selection rules.
    ///
    /// Rules of the same kind are alternatives; each kind that has rules
    /// must match. No rules at all selects everything.
    pub fn from_patterns(patterns: &[Pattern]) -> Self {
        if patterns.is_empty() {
            return Self::all();
        }
        let mut fns = Vec::new();
        let mut classes = Vec::new();
        let mut mods = Vec::new();
        for pattern in patterns {
            match pattern {
                Pattern::Fn(p) => fns.push(p.clone()),
                Pattern::Class(c) => classes.push(c.clone()),
                Pattern::Mod(m) => mods.push(m.clone()),
            }
        }
        Self::new(move |class, function| {
            let bare = function.rsplit("::").next().unwrap_or(function);
            let fn_ok = fns.is_empty() || fns.iter().any(|p| bare.contains(p.as_str()));
            let class_ok = classes.is_empty()
                || class.is_some_and(|class| {
                    let bare_class = class.rsplit("::").next().unwrap_or(class);
                    classes.iter().any(|c| c == class || c == bare_class)
                });
            let module = module_of(class.unwrap_or(function));
            let mod_ok = mods.is_empty() || mods.iter().any(|m| in_module(module, m));
            fn_ok && class_ok && mod_ok
        })
    }

    pub fn accepts(&self, class: Option<&str>, function: &str) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(class, function),
            None => true,
        }
    }

    pub fn is_all(&self) -> bool {
        self.predicate.is_none()
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.predicate {
            Some(_) => f.write_str("Filter(<predicate>)"),
            None => f.write_str("Filter(all)"),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Fn(p) => write!(f, "--fn {p}"),
            Pattern::Class(c) => write!(f, "--class {c}"),
            Pattern::Mod(m) => write!(f, "--mod {m}"),
        }
    }
}

/// Module part of a qualified name (`walker::scan` -> `walker`).
fn module_of(qualified: &str) -> &str {
    qualified.rsplit_once("::").map_or("", |(module, _)| module)
}

fn in_module(module: &str, prefix: &str) -> bool {
    module == prefix
        || module
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with("::"))
}
