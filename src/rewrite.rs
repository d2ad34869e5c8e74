use std::collections::HashSet;
use std::sync::Arc;

use quote::ToTokens;
use syn::ext::IdentExt;
use syn::visit::Visit;
use syn::visit_mut::VisitMut;

use crate::filter::Filter;
use crate::wrapper::{self, Dispatch, TypeScope, WrapSpec};

/// Path of the resolver named in woven code when none is configured.
pub const DEFAULT_RESOLVER: &str = "weave_runtime::resolve";

/// How one module is woven.
#[derive(Clone)]
pub struct Options {
    /// Function called as `RESOLVER(class, function)` on a slot's first use.
    pub resolver: syn::Path,
    pub filter: Filter,
    /// Module path of the source being woven, relative to the crate root.
    /// Empty for the crate root itself.
    pub namespace: Vec<String>,
    /// Types declared elsewhere in the crate. Types of the file being woven
    /// are added on top.
    pub types: Arc<DeclaredTypes>,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("resolver", &self.resolver.to_token_stream().to_string())
            .field("filter", &self.filter)
            .field("namespace", &self.namespace)
            .field("types", &self.types)
            .finish()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(syn::parse_quote!(weave_runtime::resolve), Filter::all())
    }
}

impl Options {
    pub fn new(resolver: syn::Path, filter: Filter) -> Self {
        Self {
            resolver,
            filter,
            namespace: Vec::new(),
            types: Arc::default(),
        }
    }

    /// Same options, knowing the types declared across the crate.
    pub fn with_types(self, types: DeclaredTypes) -> Self {
        Self {
            types: Arc::new(types),
            ..self
        }
    }

    /// Same options for the module at `module_path` (`"walker::scan"`).
    pub fn for_module(&self, module_path: &str) -> Self {
        Self {
            namespace: module_path
                .split("::")
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            ..self.clone()
        }
    }

    /// Crate-relative path of the resolver when it lives in the crate being
    /// woven (`crate::hooks::resolve` -> `hooks::resolve`).
    pub fn resolver_in_crate(&self) -> Option<String> {
        let mut segments = self.resolver.segments.iter().map(|s| s.ident.to_string());
        if segments.next().as_deref() != Some("crate") {
            return None;
        }
        Some(segments.collect::<Vec<_>>().join("::"))
    }

    /// Module that defines an in-crate resolver (`hooks` for
    /// `crate::hooks::resolve`, empty for the crate root).
    pub fn resolver_module(&self) -> Option<String> {
        let path = self.resolver_in_crate()?;
        Some(match path.rsplit_once("::") {
            Some((module, _)) => module.to_string(),
            None => String::new(),
        })
    }
}

/// Result of instrumenting a source file.
pub struct Instrumented {
    /// Rewritten text, or the input unchanged when nothing was hooked.
    pub source: String,
    pub hooked: bool,
    /// Qualified names of the wrapped functions, innermost first.
    pub wrapped: Vec<String>,
}

/// Rewrite `source` so every eligible function body is wrapped with hook
/// calls.
///
/// Methods are identified by (class, method) where the class is the impl's
/// self type or the trait name, qualified with the module path. Free
/// functions are identified by (None, qualified name). When nothing is
/// wrapped the input text is returned as is, never re-printed.
pub fn instrument_source(source: &str, options: &Options) -> Result<Instrumented, syn::Error> {
    let mut file: syn::File = syn::parse_str(source)?;
    let (hooked, wrapped) = instrument_file(&mut file, options);
    let source = if hooked {
        prettyplease::unparse(&file)
    } else {
        source.to_string()
    };
    Ok(Instrumented {
        source,
        hooked,
        wrapped,
    })
}

/// Instrument an already parsed file in place.
pub fn instrument_file(file: &mut syn::File, options: &Options) -> (bool, Vec<String>) {
    let mut types = (*options.types).clone();
    types.extend(DeclaredTypes::from_file(file));
    let mut instrumenter = Instrumenter {
        options,
        resolver_in_crate: options.resolver_in_crate(),
        namespace: options.namespace.clone(),
        classes: Vec::new(),
        functions: Vec::new(),
        types: Arc::new(types),
        hooked: false,
        wrapped: Vec::new(),
    };
    instrumenter.visit_file_mut(file);
    (instrumenter.hooked, instrumenter.wrapped)
}

/// Functions whose shape rules out wrapping regardless of filter.
pub fn is_weavable(sig: &syn::Signature) -> bool {
    sig.constness.is_none()
        && sig.asyncness.is_none()
        && sig.unsafety.is_none()
        && sig.abi.is_none()
        && sig.variadic.is_none()
        && !matches!(&sig.output, syn::ReturnType::Type(_, ty) if matches!(**ty, syn::Type::Never(_)))
}

/// Names of the structs, enums, unions and type aliases a crate declares,
/// split by whether they take lifetime parameters.
///
/// A type with a lifetime parameter may appear in a signature with the
/// lifetime elided (`-> Token`), which hides the borrow from a syntactic
/// check. A name declared both ways counts as borrowing.
#[derive(Debug, Clone, Default)]
pub struct DeclaredTypes {
    owned: HashSet<String>,
    borrowing: HashSet<String>,
}

impl DeclaredTypes {
    pub fn from_file(file: &syn::File) -> Self {
        struct Collector(DeclaredTypes);
        impl Collector {
            fn record(&mut self, ident: &syn::Ident, generics: &syn::Generics) {
                let name = ident.unraw().to_string();
                if generics.lifetimes().next().is_some() {
                    self.0.borrowing.insert(name);
                } else {
                    self.0.owned.insert(name);
                }
            }
        }
        impl<'ast> Visit<'ast> for Collector {
            fn visit_item_struct(&mut self, node: &'ast syn::ItemStruct) {
                self.record(&node.ident, &node.generics);
            }
            fn visit_item_enum(&mut self, node: &'ast syn::ItemEnum) {
                self.record(&node.ident, &node.generics);
            }
            fn visit_item_union(&mut self, node: &'ast syn::ItemUnion) {
                self.record(&node.ident, &node.generics);
            }
            fn visit_item_type(&mut self, node: &'ast syn::ItemType) {
                self.record(&node.ident, &node.generics);
            }
        }
        let mut collector = Collector(DeclaredTypes::default());
        collector.visit_file(file);
        collector.0
    }

    pub fn extend(&mut self, other: DeclaredTypes) {
        self.owned.extend(other.owned);
        self.borrowing.extend(other.borrowing);
    }

    /// Declared without lifetime parameters, and never with them.
    pub fn is_owned(&self, name: &str) -> bool {
        self.owned.contains(name) && !self.borrowing.contains(name)
    }

    pub fn is_borrowing(&self, name: &str) -> bool {
        self.borrowing.contains(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FnKind {
    Free,
    Associated,
}

/// An enclosing `impl` or `trait`.
struct ClassFrame {
    name: String,
    generics: HashSet<String>,
    self_static: bool,
    /// `impl Debug for T`: rendering `self` there would re-enter `fmt`.
    implements_debug: bool,
}

/// An eligible function whose body is wrapped when the visitor leaves it.
struct FunctionFrame {
    class: Option<String>,
    function: String,
    dispatch: Dispatch,
    line: usize,
    scope: TypeScope,
    render_self: bool,
}

struct Instrumenter<'a> {
    options: &'a Options,
    resolver_in_crate: Option<String>,
    namespace: Vec<String>,
    /// `None` entries are pushed by free functions, which start a context
    /// with no enclosing class even when nested in a method body.
    classes: Vec<Option<ClassFrame>>,
    /// `None` entries mark functions that are traversed but not wrapped.
    functions: Vec<Option<FunctionFrame>>,
    types: Arc<DeclaredTypes>,
    hooked: bool,
    wrapped: Vec<String>,
}

impl Instrumenter<'_> {
    fn qualify(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}::{name}", self.namespace.join("::"))
        }
    }

    fn enter_function(&mut self, kind: FnKind, sig: &syn::Signature, block: &syn::Block) {
        let frame = self.eligible(kind, sig, block);
        self.functions.push(frame);
    }

    fn exit_function(&mut self, sig: &mut syn::Signature, block: &mut syn::Block) {
        let Some(Some(frame)) = self.functions.pop() else {
            return;
        };
        let spec = WrapSpec {
            class: frame.class.as_deref(),
            function: &frame.function,
            dispatch: frame.dispatch,
            line: frame.line,
            resolver: &self.options.resolver,
            scope: &frame.scope,
            render_self: frame.render_self,
        };
        wrapper::wrap(&spec, sig, block);
        self.hooked = true;
        self.wrapped.push(match &frame.class {
            Some(class) => format!("{class}::{}", frame.function),
            None => frame.function,
        });
    }

    fn eligible(
        &self,
        kind: FnKind,
        sig: &syn::Signature,
        block: &syn::Block,
    ) -> Option<FunctionFrame> {
        if !is_weavable(sig) || wrapper::is_woven(block) {
            return None;
        }
        let class = match kind {
            FnKind::Free => None,
            FnKind::Associated => self.classes.last().and_then(Option::as_ref),
        };
        let name = sig.ident.unraw().to_string();
        let (class_name, function) = match class {
            Some(frame) => (Some(self.qualify(&frame.name)), name),
            None => (None, self.qualify(&name)),
        };
        if class_name.is_none() && self.resolver_in_crate.as_deref() == Some(function.as_str()) {
            tracing::debug!(function, "not weaving the hook resolver");
            return None;
        }
        if !self.options.filter.accepts(class_name.as_deref(), &function) {
            return None;
        }

        let dispatch = match (kind, sig.receiver()) {
            (FnKind::Free, _) => Dispatch::Free,
            (FnKind::Associated, Some(_)) => Dispatch::Instance,
            (FnKind::Associated, None) => Dispatch::Static,
        };
        let mut generics: HashSet<String> = sig
            .generics
            .type_params()
            .map(|p| p.ident.to_string())
            .collect();
        if let Some(frame) = class {
            generics.extend(frame.generics.iter().cloned());
        }
        Some(FunctionFrame {
            class: class_name,
            function,
            dispatch,
            line: sig.fn_token.span.start().line,
            scope: TypeScope {
                generics,
                self_static: class.is_some_and(|c| c.self_static),
                types: Arc::clone(&self.types),
            },
            render_self: !class.is_some_and(|c| c.implements_debug),
        })
    }
}

impl VisitMut for Instrumenter<'_> {
    fn visit_item_fn_mut(&mut self, node: &mut syn::ItemFn) {
        self.enter_function(FnKind::Free, &node.sig, &node.block);
        self.classes.push(None);
        syn::visit_mut::visit_item_fn_mut(self, node);
        self.classes.pop();
        self.exit_function(&mut node.sig, &mut node.block);
    }

    fn visit_item_impl_mut(&mut self, node: &mut syn::ItemImpl) {
        let generics: HashSet<String> = node
            .generics
            .type_params()
            .map(|p| p.ident.to_string())
            .collect();
        let self_static = node.generics.params.is_empty()
            && TypeScope {
                types: Arc::clone(&self.types),
                ..TypeScope::default()
            }
            .is_static(&node.self_ty);
        let implements_debug = node
            .trait_
            .as_ref()
            .and_then(|(_, path, _)| path.segments.last())
            .is_some_and(|seg| seg.ident == "Debug");
        self.classes.push(Some(ClassFrame {
            name: type_ident(&node.self_ty),
            generics,
            self_static,
            implements_debug,
        }));
        syn::visit_mut::visit_item_impl_mut(self, node);
        self.classes.pop();
    }

    fn visit_impl_item_fn_mut(&mut self, node: &mut syn::ImplItemFn) {
        self.enter_function(FnKind::Associated, &node.sig, &node.block);
        syn::visit_mut::visit_impl_item_fn_mut(self, node);
        self.exit_function(&mut node.sig, &mut node.block);
    }

    fn visit_item_trait_mut(&mut self, node: &mut syn::ItemTrait) {
        self.classes.push(Some(ClassFrame {
            name: node.ident.unraw().to_string(),
            generics: node
                .generics
                .type_params()
                .map(|p| p.ident.to_string())
                .collect(),
            self_static: false,
            implements_debug: false,
        }));
        syn::visit_mut::visit_item_trait_mut(self, node);
        self.classes.pop();
    }

    fn visit_trait_item_fn_mut(&mut self, node: &mut syn::TraitItemFn) {
        let Some(block) = &mut node.default else {
            return;
        };
        self.enter_function(FnKind::Associated, &node.sig, block);
        syn::visit_mut::visit_block_mut(self, block);
        self.exit_function(&mut node.sig, block);
    }

    // Foreign blocks only declare signatures.
    fn visit_item_foreign_mod_mut(&mut self, _: &mut syn::ItemForeignMod) {}

    fn visit_item_mod_mut(&mut self, node: &mut syn::ItemMod) {
        if node.content.is_none() {
            return;
        }
        self.namespace.push(node.ident.unraw().to_string());
        syn::visit_mut::visit_item_mod_mut(self, node);
        self.namespace.pop();
    }
}

/// Extract the type name from a `syn::Type` for class names.
fn type_ident(ty: &syn::Type) -> String {
    match ty {
        syn::Type::Path(tp) => tp
            .path
            .segments
            .last()
            .map(|seg| seg.ident.unraw().to_string())
            .unwrap_or_else(|| ty.to_token_stream().to_string()),
        syn::Type::Reference(r) => type_ident(&r.elem),
        syn::Type::Paren(p) => type_ident(&p.elem),
        syn::Type::Group(g) => type_ident(&g.elem),
        _ => ty.to_token_stream().to_string().replace(' ', ""),
    }
}
