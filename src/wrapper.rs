//! Generated wrapper for one eligible function.
//!
//! Given `fn scale(&self, factor: u32, label: &str) -> u32 { BODY }` the
//! woven body is, schematically:
//!
//! ```text
//! static __WEAVE_HOOKS: weave_runtime::HookSlot = weave_runtime::HookSlot::new();
//! let __weave_hooks = __WEAVE_HOOKS.get_or_resolve(|| RESOLVER(Some("Meter"), "scale"));
//! let mut __weave_call = __weave_hooks.is_active().then(|| weave_runtime::Call { .. });
//! if let (Some(__weave_pre), Some(__weave_call)) = (&__weave_hooks.pre, &mut __weave_call) {
//!     for __weave_override in __weave_pre(__weave_call) {
//!         // rebind `factor` (owned, 'static), reject `label` (borrowed)
//!     }
//!     // retake the argument snapshot if anything was rebound
//! }
//! let __weave_result = weave_runtime::guarded::<u32, _>(|| BODY);
//! match __weave_result {
//!     Ok(mut __weave_return) => { /* post-hook, optional replacement */ __weave_return }
//!     Err(__weave_panic) => { /* post-hook */ std::panic::resume_unwind(__weave_panic) }
//! }
//! ```
//!
//! Moving the body into the guarded closure retargets every `return` and `?`
//! of the original body: they now leave the guarded region with their value
//! captured in `__weave_result` instead of leaving the function, so the post
//! stage observes the real final value on every path.

use std::collections::HashSet;
use std::sync::Arc;

use proc_macro2::TokenStream;
use quote::{ToTokens, quote};
use syn::ext::IdentExt;
use syn::visit::Visit;

use crate::rewrite::DeclaredTypes;

/// Name of the per-function hook slot. Its presence as the first statement
/// of a body marks the function as already woven.
pub(crate) const HOOK_SLOT: &str = "__WEAVE_HOOKS";

/// Standard library types that own their contents whenever their type
/// arguments do. Anything not listed here or declared by the crate is
/// treated as possibly borrowing.
const STD_OWNED_TYPES: &[&str] = &[
    "bool", "char", "str", "u8", "u16", "u32", "u64", "u128", "usize", "i8", "i16", "i32",
    "i64", "i128", "isize", "f32", "f64", "String", "Vec", "VecDeque", "LinkedList", "HashMap",
    "HashSet", "BTreeMap", "BTreeSet", "BinaryHeap", "Box", "Rc", "Arc", "Cell", "RefCell",
    "Mutex", "RwLock", "Option", "Result", "Reverse", "Wrapping", "PhantomData", "PathBuf",
    "OsString", "CString", "Duration", "Instant", "SystemTime", "Ordering", "Range",
    "RangeInclusive", "IpAddr", "Ipv4Addr", "Ipv6Addr", "SocketAddr", "TypeId", "Error",
    "ErrorKind", "ParseIntError", "ParseFloatError", "ParseBoolError", "Utf8Error",
    "FromUtf8Error",
];

/// Leading path segments that name the standard library.
const STD_ROOTS: &[&str] = &["std", "core", "alloc"];

/// How the function is dispatched, which decides the target expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Free,
    Static,
    Instance,
}

/// Declared return shape.
pub(crate) enum ReturnShape {
    Void,
    ByValue(syn::Type),
    ByReference(syn::Type),
}

/// What is known about types at the function's position, used to decide
/// whether a parameter or return type is provably owned and `'static` (so it
/// can be downcast from `Box<dyn Any>`).
#[derive(Debug, Clone, Default)]
pub(crate) struct TypeScope {
    pub generics: HashSet<String>,
    pub self_static: bool,
    pub types: Arc<DeclaredTypes>,
}

impl TypeScope {
    pub(crate) fn is_static(&self, ty: &syn::Type) -> bool {
        match ty {
            syn::Type::Path(tp) => tp.qself.is_none() && self.path_is_static(&tp.path),
            syn::Type::Reference(r) => {
                r.lifetime.as_ref().is_some_and(|l| l.ident == "static") && self.is_static(&r.elem)
            }
            syn::Type::Tuple(t) => t.elems.iter().all(|e| self.is_static(e)),
            syn::Type::Array(a) => self.is_static(&a.elem),
            syn::Type::Slice(s) => self.is_static(&s.elem),
            syn::Type::Paren(p) => self.is_static(&p.elem),
            syn::Type::Group(g) => self.is_static(&g.elem),
            syn::Type::Ptr(p) => self.is_static(&p.elem),
            _ => false,
        }
    }

    fn path_is_static(&self, path: &syn::Path) -> bool {
        let (Some(first), Some(last)) = (path.segments.first(), path.segments.last()) else {
            return false;
        };
        if path.leading_colon.is_none()
            && (first.ident == "Self" || self.generics.contains(&first.ident.to_string()))
        {
            // `Self`, `T`, and projections like `T::Output`.
            return path.segments.len() == 1
                && first.ident == "Self"
                && first.arguments.is_none()
                && self.self_static;
        }
        // Only the last segment names a type; the rest are modules.
        if path.segments.iter().rev().skip(1).any(|seg| !seg.arguments.is_none()) {
            return false;
        }
        let name = last.ident.to_string();
        let from_std = path.segments.len() > 1 && STD_ROOTS.contains(&first.ident.to_string().as_str());
        let known = if from_std {
            STD_OWNED_TYPES.contains(&name.as_str())
        } else {
            !self.types.is_borrowing(&name)
                && (STD_OWNED_TYPES.contains(&name.as_str()) || self.types.is_owned(&name))
        };
        if !known {
            return false;
        }
        match &last.arguments {
            syn::PathArguments::None => true,
            syn::PathArguments::Parenthesized(_) => false,
            syn::PathArguments::AngleBracketed(args) => args.args.iter().all(|arg| match arg {
                syn::GenericArgument::Lifetime(l) => l.ident == "static",
                syn::GenericArgument::Type(t) => self.is_static(t),
                syn::GenericArgument::AssocType(a) => self.is_static(&a.ty),
                syn::GenericArgument::Const(_) | syn::GenericArgument::AssocConst(_) => true,
                _ => false,
            }),
        }
    }
}

/// Everything the generator needs about one eligible function.
pub(crate) struct WrapSpec<'a> {
    pub class: Option<&'a str>,
    pub function: &'a str,
    pub dispatch: Dispatch,
    pub line: usize,
    pub resolver: &'a syn::Path,
    pub scope: &'a TypeScope,
    /// False inside `impl Debug`, where rendering `self` would recurse.
    pub render_self: bool,
}

pub(crate) fn return_shape(output: &syn::ReturnType) -> ReturnShape {
    match output {
        syn::ReturnType::Default => ReturnShape::Void,
        syn::ReturnType::Type(_, ty) => match &**ty {
            syn::Type::Tuple(t) if t.elems.is_empty() => ReturnShape::Void,
            syn::Type::Reference(_) => ReturnShape::ByReference((**ty).clone()),
            _ => ReturnShape::ByValue((**ty).clone()),
        },
    }
}

/// Whether the type can be spelled inside the function body. `impl Trait`
/// cannot, so the guarded closure's type is left to inference.
fn is_nameable(ty: &syn::Type) -> bool {
    struct Finder {
        found: bool,
    }
    impl<'ast> Visit<'ast> for Finder {
        fn visit_type_impl_trait(&mut self, _: &'ast syn::TypeImplTrait) {
            self.found = true;
        }
        fn visit_type_infer(&mut self, _: &'ast syn::TypeInfer) {
            self.found = true;
        }
    }
    let mut finder = Finder { found: false };
    finder.visit_type(ty);
    !finder.found
}

/// One declared (non-receiver) parameter.
struct Param {
    index: usize,
    name: String,
    /// Binding identifier when the parameter is bound by a plain name.
    ident: Option<syn::Ident>,
    ty: syn::Type,
    overridable: bool,
}

/// Collect parameters and mark every overridable one `mut` so the override
/// stage can rebind it in place.
fn collect_params(sig: &mut syn::Signature, scope: &TypeScope) -> Vec<Param> {
    let mut params = Vec::new();
    for input in sig.inputs.iter_mut() {
        let syn::FnArg::Typed(pat_type) = input else {
            continue;
        };
        let index = params.len();
        let ty = (*pat_type.ty).clone();
        match &mut *pat_type.pat {
            syn::Pat::Ident(pat_ident) if pat_ident.by_ref.is_none() && pat_ident.subpat.is_none() => {
                let overridable = scope.is_static(&ty);
                if overridable && pat_ident.mutability.is_none() {
                    pat_ident.mutability = Some(Default::default());
                }
                let ident = pat_ident.ident.clone();
                params.push(Param {
                    index,
                    name: ident.unraw().to_string(),
                    ident: Some(ident),
                    ty,
                    overridable,
                });
            }
            other => params.push(Param {
                index,
                name: other.to_token_stream().to_string(),
                ident: None,
                ty,
                overridable: false,
            }),
        }
    }
    params
}

fn receiver_address(sig: &syn::Signature) -> TokenStream {
    match sig.receiver() {
        Some(r) if r.reference.is_some() => quote! { weave_runtime::address_of(self) },
        Some(r) if r.colon_token.is_some() && !is_self_type(&r.ty) => {
            quote! { weave_runtime::address_of(&*self) }
        }
        _ => quote! { weave_runtime::address_of(&self) },
    }
}

fn is_self_type(ty: &syn::Type) -> bool {
    matches!(ty, syn::Type::Path(tp) if tp.qself.is_none() && tp.path.is_ident("Self"))
}

fn target_expr(spec: &WrapSpec<'_>, sig: &syn::Signature) -> TokenStream {
    match spec.dispatch {
        Dispatch::Free => quote! { weave_runtime::Target::None },
        Dispatch::Static => quote! {
            weave_runtime::Target::Type { type_name: std::any::type_name::<Self>() }
        },
        Dispatch::Instance => {
            let address = receiver_address(sig);
            let rendered = if spec.render_self {
                quote! { weave_runtime::render!(self) }
            } else {
                quote! { None }
            };
            quote! {
                weave_runtime::Target::Instance {
                    type_name: std::any::type_name::<Self>(),
                    address: #address,
                    rendered: #rendered,
                }
            }
        }
    }
}

fn capture_expr(param: &Param) -> TokenStream {
    let index = param.index;
    let name = &param.name;
    match &param.ident {
        Some(ident) => quote! {
            weave_runtime::Arg::new(
                #index,
                #name,
                std::any::type_name_of_val(&#ident),
                weave_runtime::render!(#ident),
            )
        },
        None => {
            let ty = param.ty.to_token_stream().to_string();
            quote! { weave_runtime::Arg::unbound(#index, #name, #ty) }
        }
    }
}

fn override_arm(param: &Param) -> TokenStream {
    let index = param.index;
    match (&param.ident, param.overridable) {
        (Some(ident), true) => {
            let ty = &param.ty;
            quote! {
                Some(#index) => match __weave_value.downcast::<#ty>() {
                    Ok(__weave_new) => {
                        #ident = *__weave_new;
                        __weave_overridden = true;
                    }
                    Err(_) => weave_runtime::mismatched_argument(__weave_call, &__weave_key),
                },
            }
        }
        _ => quote! {
            Some(#index) => weave_runtime::argument_not_overridable(__weave_call, &__weave_key),
        },
    }
}

fn post_stage(shape: &ReturnShape, scope: &TypeScope) -> TokenStream {
    let panicked = quote! {
        Err(__weave_panic) => {
            if let (Some(__weave_post), Some(__weave_call)) = (&__weave_hooks.post, &__weave_call) {
                let _ = weave_runtime::in_hook(|| {
                    __weave_post(__weave_call, &weave_runtime::Outcome::panicked(&*__weave_panic))
                });
            }
            std::panic::resume_unwind(__weave_panic)
        }
    };
    match shape {
        ReturnShape::Void => quote! {
            match __weave_result {
                Ok(()) => {
                    if let (Some(__weave_post), Some(__weave_call)) = (&__weave_hooks.post, &__weave_call) {
                        let _ = weave_runtime::in_hook(|| {
                            __weave_post(__weave_call, &weave_runtime::Outcome::completed())
                        });
                    }
                }
                #panicked
            }
        },
        ReturnShape::ByValue(ty) | ReturnShape::ByReference(ty)
            if is_nameable(ty) && scope.is_static(ty) =>
        {
            quote! {
                match __weave_result {
                    Ok(mut __weave_return) => {
                        if let (Some(__weave_post), Some(__weave_call)) = (&__weave_hooks.post, &__weave_call) {
                            let __weave_replacement = weave_runtime::in_hook(|| {
                                __weave_post(
                                    __weave_call,
                                    &weave_runtime::Outcome::returned(weave_runtime::Returned {
                                        type_name: std::any::type_name_of_val(&__weave_return),
                                        rendered: weave_runtime::render!(__weave_return),
                                        value: Some(&__weave_return),
                                    }),
                                )
                            });
                            if let Some(__weave_replacement) = __weave_replacement {
                                match __weave_replacement.downcast::<#ty>() {
                                    Ok(__weave_new) => __weave_return = *__weave_new,
                                    Err(_) => weave_runtime::mismatched_return(__weave_call),
                                }
                            }
                        }
                        __weave_return
                    }
                    #panicked
                }
            }
        }
        ReturnShape::ByValue(_) | ReturnShape::ByReference(_) => quote! {
            match __weave_result {
                Ok(__weave_return) => {
                    if let (Some(__weave_post), Some(__weave_call)) = (&__weave_hooks.post, &__weave_call) {
                        let __weave_replacement = weave_runtime::in_hook(|| {
                            __weave_post(
                                __weave_call,
                                &weave_runtime::Outcome::returned(weave_runtime::Returned {
                                    type_name: std::any::type_name_of_val(&__weave_return),
                                    rendered: weave_runtime::render!(__weave_return),
                                    value: None,
                                }),
                            )
                        });
                        if __weave_replacement.is_some() {
                            weave_runtime::return_not_replaceable(__weave_call);
                        }
                    }
                    __weave_return
                }
                #panicked
            }
        },
    }
}

/// Replace `block` with the generated wrapper around its original statements.
///
/// Hook calls and argument snapshots run inside `weave_runtime::in_hook`, so
/// woven code reached from a hook (the hook's own helpers, `Debug` impls)
/// runs unhooked.
pub(crate) fn wrap(spec: &WrapSpec<'_>, sig: &mut syn::Signature, block: &mut syn::Block) {
    let params = collect_params(sig, spec.scope);
    let shape = return_shape(&sig.output);

    let resolver = spec.resolver;
    let function = spec.function;
    let class = match spec.class {
        Some(class) => quote! { Some(#class) },
        None => quote! { None },
    };
    let line = spec.line as u32;
    let slot = syn::Ident::new(HOOK_SLOT, proc_macro2::Span::call_site());
    let target = target_expr(spec, sig);
    let captures: Vec<TokenStream> = params.iter().map(capture_expr).collect();
    let names = params.iter().map(|p| p.name.as_str());
    let arms = params.iter().map(override_arm);
    let result_ty = match &shape {
        ReturnShape::Void => quote! { () },
        ReturnShape::ByValue(ty) | ReturnShape::ByReference(ty) if is_nameable(ty) => {
            ty.to_token_stream()
        }
        _ => quote! { _ },
    };
    let post = post_stage(&shape, spec.scope);
    let (overridden, resnapshot) = if params.iter().any(|p| p.overridable) {
        (
            quote! { let mut __weave_overridden = false; },
            quote! {
                if __weave_overridden {
                    __weave_call.args = weave_runtime::in_hook(|| vec![#(#captures),*]);
                }
            },
        )
    } else {
        (TokenStream::new(), TokenStream::new())
    };
    let body = std::mem::replace(block, syn::parse_quote!({}));

    // After an override the snapshot is retaken, so the post hook sees the
    // arguments the body ran with.
    *block = syn::parse_quote! {{
        static #slot: weave_runtime::HookSlot = weave_runtime::HookSlot::new();
        let __weave_hooks = #slot.get_or_resolve(|| #resolver(#class, #function));
        let mut __weave_call = __weave_hooks.is_active().then(|| {
            weave_runtime::in_hook(|| weave_runtime::Call {
                target: #target,
                args: vec![#(#captures),*],
                class: #class,
                function: #function,
                file: file!(),
                line: #line,
            })
        });
        if let (Some(__weave_pre), Some(__weave_call)) = (&__weave_hooks.pre, &mut __weave_call) {
            #overridden
            for __weave_override in weave_runtime::in_hook(|| __weave_pre(&*__weave_call)) {
                let weave_runtime::Override { key: __weave_key, value: __weave_value } = __weave_override;
                match __weave_key.position(&[#(#names),*]) {
                    #(#arms)*
                    _ => weave_runtime::unexpected_argument(__weave_call, &__weave_key),
                }
            }
            #resnapshot
        }
        let __weave_result = weave_runtime::guarded::<#result_ty, _>(|| #body);
        #post
    }};
}

/// Whether `block` already starts with the hook slot of a previous pass.
pub(crate) fn is_woven(block: &syn::Block) -> bool {
    matches!(
        block.stmts.first(),
        Some(syn::Stmt::Item(syn::Item::Static(s))) if s.ident == HOOK_SLOT
    )
}
