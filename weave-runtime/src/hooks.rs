use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Runs before the original body. Returned overrides rebind parameters.
pub type PreHook = Arc<dyn Fn(&Call) -> Vec<Override> + Send + Sync>;

/// Runs after the original body on every exit path. A `Some` result replaces
/// the return value of non-void functions.
pub type PostHook =
    Arc<dyn Fn(&Call, &Outcome<'_>) -> Option<Box<dyn Any + Send>> + Send + Sync>;

/// The (pre, post) hook pair resolved for one function identity.
///
/// Either side may be absent. `Hooks::default()` is the "not instrumented"
/// pair and is what a slot stores when the resolver returns nothing.
#[derive(Clone, Default)]
pub struct Hooks {
    pub pre: Option<PreHook>,
    pub post: Option<PostHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pre<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Call) -> Vec<Override> + Send + Sync + 'static,
    {
        self.pre = Some(Arc::new(hook));
        self
    }

    pub fn with_post<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Call, &Outcome<'_>) -> Option<Box<dyn Any + Send>> + Send + Sync + 'static,
    {
        self.post = Some(Arc::new(hook));
        self
    }

    /// Whether any hook is present. Woven code skips the call snapshot
    /// entirely when this is false.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.pre.is_some() || self.post.is_some()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("pre", &self.pre.is_some())
            .field("post", &self.post.is_some())
            .finish()
    }
}

/// What a woven function was invoked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Free function.
    None,
    /// Associated function without a receiver.
    Type { type_name: &'static str },
    /// Method with a `self` receiver.
    Instance {
        type_name: &'static str,
        address: usize,
        rendered: Option<String>,
    },
}

/// Snapshot of one argument at call time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub index: usize,
    pub name: &'static str,
    pub type_name: &'static str,
    /// `Debug` rendering, when the argument type implements `Debug`.
    pub rendered: Option<String>,
}

impl Arg {
    pub fn new(
        index: usize,
        name: &'static str,
        type_name: &'static str,
        rendered: Option<String>,
    ) -> Self {
        Self {
            index,
            name,
            type_name,
            rendered,
        }
    }

    /// A parameter bound by a destructuring pattern: there is no single
    /// value to render, only the declared pattern and type.
    pub fn unbound(index: usize, name: &'static str, type_name: &'static str) -> Self {
        Self::new(index, name, type_name, None)
    }
}

/// Everything the hooks learn about one invocation.
///
/// The pre hook sees the arguments as passed. When it overrides any of
/// them, `args` is taken again before the body runs, so the post hook sees
/// the values the body actually received.
#[derive(Debug, Clone)]
pub struct Call {
    pub target: Target,
    pub args: Vec<Arg>,
    pub class: Option<&'static str>,
    pub function: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl Call {
    pub fn arg(&self, name: &str) -> Option<&Arg> {
        self.args.iter().find(|a| a.name == name)
    }

    /// `Class::function` or just `function` for free functions.
    pub fn qualified_name(&self) -> String {
        match self.class {
            Some(class) => format!("{class}::{}", self.function),
            None => self.function.to_string(),
        }
    }
}

/// Key of a parameter override: declared position or declared name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgKey {
    Index(usize),
    Name(Cow<'static, str>),
}

impl ArgKey {
    /// Position of the declared parameter this key refers to, if any.
    pub fn position(&self, names: &[&str]) -> Option<usize> {
        match self {
            ArgKey::Index(i) if *i < names.len() => Some(*i),
            ArgKey::Index(_) => None,
            ArgKey::Name(name) => names.iter().position(|n| *n == &**name),
        }
    }
}

impl From<usize> for ArgKey {
    fn from(index: usize) -> Self {
        ArgKey::Index(index)
    }
}

impl From<&'static str> for ArgKey {
    fn from(name: &'static str) -> Self {
        ArgKey::Name(Cow::Borrowed(name))
    }
}

impl From<String> for ArgKey {
    fn from(name: String) -> Self {
        ArgKey::Name(Cow::Owned(name))
    }
}

impl fmt::Display for ArgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKey::Index(i) => write!(f, "{i}"),
            ArgKey::Name(name) => f.write_str(name),
        }
    }
}

/// A replacement value for one parameter, returned by a pre-hook.
pub struct Override {
    pub key: ArgKey,
    pub value: Box<dyn Any + Send>,
}

impl Override {
    pub fn new(key: impl Into<ArgKey>, value: impl Any + Send) -> Self {
        Self {
            key: key.into(),
            value: Box::new(value),
        }
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Override")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// The value a woven function produced.
pub struct Returned<'a> {
    pub type_name: &'static str,
    pub rendered: Option<String>,
    /// Direct access for owned `'static` return types.
    pub value: Option<&'a dyn Any>,
}

impl fmt::Debug for Returned<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Returned")
            .field("type_name", &self.type_name)
            .field("rendered", &self.rendered)
            .finish_non_exhaustive()
    }
}

/// How the original body finished. Exactly one of `returned` and `panic` is
/// set, except for void functions which report `returned: None` on success.
#[derive(Debug)]
pub struct Outcome<'a> {
    pub returned: Option<Returned<'a>>,
    pub panic: Option<&'a (dyn Any + Send)>,
}

impl<'a> Outcome<'a> {
    pub fn returned(returned: Returned<'a>) -> Self {
        Self {
            returned: Some(returned),
            panic: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            returned: None,
            panic: None,
        }
    }

    pub fn panicked(payload: &'a (dyn Any + Send)) -> Self {
        Self {
            returned: None,
            panic: Some(payload),
        }
    }

    pub fn is_panic(&self) -> bool {
        self.panic.is_some()
    }

    pub fn panic_message(&self) -> Option<&str> {
        self.panic.and_then(crate::panic_message)
    }
}
