//! Module resolution: from a crate root file to every source file reachable
//! through `mod` declarations, keyed by module path.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::rewrite::DeclaredTypes;

/// The module tree of one crate target.
///
/// Module names are full paths starting with the crate name: the root file
/// is `mini`, `src/walker/scan.rs` is `mini::walker::scan`.
#[derive(Debug, Clone)]
pub struct ModuleTree {
    crate_name: String,
    modules: BTreeMap<String, PathBuf>,
}

impl ModuleTree {
    /// Follow `mod` declarations from `root_file`.
    ///
    /// Declarations whose file does not exist (typically behind a `cfg` for
    /// another platform) are skipped, as are files that fail to parse: such
    /// a file is still part of the tree, its children are not.
    pub fn discover(crate_name: &str, root_file: &Path) -> Result<Self, Error> {
        let mut modules = BTreeMap::new();
        let mut seen = HashSet::new();
        let root_dir = root_file.parent().unwrap_or(Path::new(".")).to_path_buf();
        let mut pending = vec![(crate_name.to_string(), root_file.to_path_buf(), root_dir)];

        while let Some((name, file, child_dir)) = pending.pop() {
            if !seen.insert(file.clone()) {
                continue;
            }
            let source = std::fs::read_to_string(&file).map_err(|source| Error::ReadError {
                path: file.clone(),
                source,
            })?;
            modules.insert(name.clone(), file.clone());

            let parsed = match syn::parse_file(&source) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!(file = %file.display(), error = %e, "not following mod declarations");
                    continue;
                }
            };
            let mut children = Vec::new();
            collect_children(&parsed.items, &name, &child_dir, &mut children);
            for (child_name, child_file) in children {
                let grandchild_dir = child_dir_of(&child_file);
                pending.push((child_name, child_file, grandchild_dir));
            }
        }

        Ok(Self {
            crate_name: crate_name.to_string(),
            modules,
        })
    }

    pub fn crate_name(&self) -> &str {
        &self.crate_name
    }

    /// Source file of `module`, if it belongs to this tree.
    pub fn find_file(&self, module: &str) -> Option<PathBuf> {
        self.modules.get(module).cloned()
    }

    /// All modules in name order.
    pub fn modules(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.modules
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_path()))
    }

    /// Types declared anywhere in the tree. Files that cannot be read or
    /// parsed contribute nothing.
    pub fn declared_types(&self) -> DeclaredTypes {
        let mut types = DeclaredTypes::default();
        for path in self.modules.values() {
            let parsed = std::fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|source| syn::parse_file(&source).map_err(|e| e.to_string()));
            match parsed {
                Ok(file) => types.extend(DeclaredTypes::from_file(&file)),
                Err(error) => {
                    tracing::debug!(file = %path.display(), error, "no declared types collected")
                }
            }
        }
        types
    }

    /// Module path relative to the crate root (`mini::walker` -> `walker`).
    pub fn namespace_of<'m>(&self, module: &'m str) -> &'m str {
        match module.strip_prefix(self.crate_name.as_str()) {
            Some(rest) => rest.strip_prefix("::").unwrap_or(rest),
            None => module,
        }
    }
}

/// Directory holding the children of the module stored in `file`.
///
/// `mod.rs`, `lib.rs`, `main.rs` own their directory; `walker.rs` owns
/// `walker/`.
fn child_dir_of(file: &Path) -> PathBuf {
    let parent = file.parent().unwrap_or(Path::new("."));
    match file.file_stem().and_then(|s| s.to_str()) {
        Some("mod") | None => parent.to_path_buf(),
        Some(stem) => parent.join(stem),
    }
}

fn collect_children(
    items: &[syn::Item],
    module: &str,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) {
    for item in items {
        let syn::Item::Mod(m) = item else {
            continue;
        };
        let ident = m.ident.to_string();
        let ident = ident.strip_prefix("r#").unwrap_or(&ident);
        let name = format!("{module}::{ident}");
        let explicit = path_attribute(&m.attrs);
        match &m.content {
            Some((_, inner)) => {
                let inner_dir = match &explicit {
                    Some(path) => dir.join(path),
                    None => dir.join(ident),
                };
                collect_children(inner, &name, &inner_dir, out);
            }
            None => {
                let candidates = match &explicit {
                    Some(path) => vec![dir.join(path)],
                    None => vec![
                        dir.join(format!("{ident}.rs")),
                        dir.join(ident).join("mod.rs"),
                    ],
                };
                match candidates.into_iter().find(|c| c.is_file()) {
                    Some(file) => out.push((name, file)),
                    None => tracing::debug!(module = name, "no source file for mod declaration"),
                }
            }
        }
    }
}

/// Value of a `#[path = "..."]` attribute.
fn path_attribute(attrs: &[syn::Attribute]) -> Option<String> {
    attrs.iter().find_map(|attr| {
        if !attr.path().is_ident("path") {
            return None;
        }
        let syn::Meta::NameValue(nv) = &attr.meta else {
            return None;
        };
        match &nv.value {
            syn::Expr::Lit(syn::ExprLit {
                lit: syn::Lit::Str(s),
                ..
            }) => Some(s.value()),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_file(base: &Path, relative: &str, content: &str) {
        let path = base.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn names(tree: &ModuleTree) -> Vec<&str> {
        tree.modules().map(|(name, _)| name).collect()
    }

    #[test]
    fn follows_file_and_directory_modules() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        create_file(&src, "main.rs", "mod walker;\nmod db;\nfn main() {}\n");
        create_file(&src, "walker.rs", "pub mod scan;\npub fn walk() {}\n");
        create_file(&src, "walker/scan.rs", "pub fn scan() {}\n");
        create_file(&src, "db/mod.rs", "mod pool;\n");
        create_file(&src, "db/pool.rs", "pub fn get() {}\n");
        create_file(&src, "orphan.rs", "pub fn unused() {}\n");

        let tree = ModuleTree::discover("mini", &src.join("main.rs")).unwrap();
        assert_eq!(
            names(&tree),
            ["mini", "mini::db", "mini::db::pool", "mini::walker", "mini::walker::scan"]
        );
        assert_eq!(
            tree.find_file("mini::walker::scan"),
            Some(src.join("walker/scan.rs"))
        );
        assert_eq!(tree.find_file("mini::orphan"), None);
    }

    #[test]
    fn inline_modules_extend_the_path() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        create_file(&src, "lib.rs", "pub mod net { pub mod tcp; }\n");
        create_file(&src, "net/tcp.rs", "pub fn connect() {}\n");

        let tree = ModuleTree::discover("mini", &src.join("lib.rs")).unwrap();
        assert_eq!(tree.find_file("mini::net::tcp"), Some(src.join("net/tcp.rs")));
        assert_eq!(tree.find_file("mini::net"), None, "inline module has no file");
    }

    #[test]
    fn path_attribute_overrides_lookup() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        create_file(
            &src,
            "lib.rs",
            "#[path = \"platform/unix_impl.rs\"]\nmod sys;\n",
        );
        create_file(&src, "platform/unix_impl.rs", "pub fn page_size() -> usize { 4096 }\n");

        let tree = ModuleTree::discover("mini", &src.join("lib.rs")).unwrap();
        assert_eq!(
            tree.find_file("mini::sys"),
            Some(src.join("platform/unix_impl.rs"))
        );
    }

    #[test]
    fn missing_and_unparsable_files_are_tolerated() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        create_file(
            &src,
            "lib.rs",
            "#[cfg(windows)]\nmod win;\nmod broken;\n",
        );
        create_file(&src, "broken.rs", "mod hidden;\nfn oops( {\n");
        create_file(&src, "broken/hidden.rs", "pub fn never() {}\n");

        let tree = ModuleTree::discover("mini", &src.join("lib.rs")).unwrap();
        assert_eq!(names(&tree), ["mini", "mini::broken"]);
    }

    #[test]
    fn declared_types_span_the_crate() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        create_file(&src, "lib.rs", "mod token;\nmod model;\nmod broken;\npub struct Root;\n");
        create_file(&src, "token.rs", "pub struct Token<'a>(&'a str);\n");
        create_file(&src, "model.rs", "pub enum Shape { Dot }\nmod inner { pub struct Deep; }\n");
        create_file(&src, "broken.rs", "struct Lost;\nfn oops( {\n");
        let tree = ModuleTree::discover("mini", &src.join("lib.rs")).unwrap();
        let types = tree.declared_types();
        assert!(types.is_owned("Root"));
        assert!(types.is_owned("Shape"));
        assert!(types.is_owned("Deep"));
        assert!(types.is_borrowing("Token"));
        assert!(!types.is_owned("Token"));
        assert!(!types.is_owned("Lost"));
    }

    #[test]
    fn namespace_strips_crate_name() {
        let tmp = TempDir::new().unwrap();
        create_file(tmp.path(), "lib.rs", "");
        let tree = ModuleTree::discover("mini", &tmp.path().join("lib.rs")).unwrap();
        assert_eq!(tree.crate_name(), "mini");
        assert_eq!(tree.namespace_of("mini"), "");
        assert_eq!(tree.namespace_of("mini::walker::scan"), "walker::scan");
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = ModuleTree::discover("mini", &tmp.path().join("lib.rs"));
        assert!(matches!(result, Err(Error::ReadError { .. })));
    }
}
