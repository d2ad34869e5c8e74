//! `[package.metadata.weave]` in the woven project's Cargo.toml.
//!
//! ```toml
//! [package.metadata.weave]
//! resolver = "crate::hooks::resolve"
//! functions = ["parse"]
//! classes = ["Walker"]
//! modules = ["walker"]
//! exclude = ["mini::vendor"]
//! cache-dir = "target/weave/cache"
//! ```
//!
//! Command-line values are added to these (patterns, exclusions) or take
//! precedence over them (resolver, cache directory).

use std::path::{Path, PathBuf};

use toml_edit::DocumentMut;

use crate::error::Error;
use crate::filter::{Filter, Pattern};
use crate::rewrite::{DEFAULT_RESOLVER, Options};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub resolver: Option<String>,
    pub patterns: Vec<Pattern>,
    pub exclude: Vec<String>,
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Read the config from `project/Cargo.toml`. A manifest without the
    /// table yields the default config.
    pub fn load(project: &Path) -> Result<Self, Error> {
        let manifest = project.join("Cargo.toml");
        let content = std::fs::read_to_string(&manifest).map_err(|source| Error::ReadError {
            path: manifest.clone(),
            source,
        })?;
        Self::from_manifest(&content, &manifest)
    }

    pub fn from_manifest(content: &str, manifest: &Path) -> Result<Self, Error> {
        let invalid = |reason: String| Error::InvalidManifest {
            path: manifest.to_path_buf(),
            reason,
        };
        let doc: DocumentMut = content.parse().map_err(|e| invalid(format!("{e}")))?;
        let Some(table) = doc
            .get("package")
            .and_then(|p| p.get("metadata"))
            .and_then(|m| m.get("weave"))
        else {
            return Ok(Self::default());
        };

        let string = |key: &str| -> Result<Option<String>, Error> {
            match table.get(key) {
                None => Ok(None),
                Some(item) => item
                    .as_str()
                    .map(|s| Some(s.to_string()))
                    .ok_or_else(|| invalid(format!("weave.{key} must be a string"))),
            }
        };
        let strings = |key: &str| -> Result<Vec<String>, Error> {
            let Some(item) = table.get(key) else {
                return Ok(Vec::new());
            };
            let array = item
                .as_array()
                .ok_or_else(|| invalid(format!("weave.{key} must be an array of strings")))?;
            array
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(String::from)
                        .ok_or_else(|| invalid(format!("weave.{key} must be an array of strings")))
                })
                .collect()
        };

        let mut patterns = Vec::new();
        patterns.extend(strings("functions")?.into_iter().map(Pattern::Fn));
        patterns.extend(strings("classes")?.into_iter().map(Pattern::Class));
        patterns.extend(strings("modules")?.into_iter().map(Pattern::Mod));

        Ok(Self {
            resolver: string("resolver")?,
            patterns,
            exclude: strings("exclude")?,
            cache_dir: string("cache-dir")?.map(PathBuf::from),
        })
    }

    /// Layer command-line values over this config.
    pub fn merge(mut self, cli: Config) -> Self {
        if cli.resolver.is_some() {
            self.resolver = cli.resolver;
        }
        self.patterns.extend(cli.patterns);
        self.exclude.extend(cli.exclude);
        if cli.cache_dir.is_some() {
            self.cache_dir = cli.cache_dir;
        }
        self
    }

    pub fn resolver_path(&self) -> Result<syn::Path, Error> {
        let text = self.resolver.as_deref().unwrap_or(DEFAULT_RESOLVER);
        syn::parse_str(text).map_err(|e| Error::InvalidResolver {
            path: text.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn options(&self) -> Result<Options, Error> {
        Ok(Options::new(
            self.resolver_path()?,
            Filter::from_patterns(&self.patterns),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Config, Error> {
        Config::from_manifest(content, Path::new("Cargo.toml"))
    }

    #[test]
    fn missing_table_is_default() {
        let config = parse("[package]\nname = \"mini\"\nversion = \"0.1.0\"\n").unwrap();
        assert_eq!(config, Config::default());
        let resolver = config.resolver_path().unwrap();
        assert_eq!(
            quote::quote!(#resolver).to_string(),
            "weave_runtime :: resolve"
        );
    }

    #[test]
    fn reads_all_keys() {
        let config = parse(
            r#"[package]
name = "mini"

[package.metadata.weave]
resolver = "crate::hooks::resolve"
functions = ["parse", "walk"]
classes = ["Walker"]
modules = ["db"]
exclude = ["mini::vendor"]
cache-dir = "target/weave/cache"
"#,
        )
        .unwrap();
        assert_eq!(config.resolver.as_deref(), Some("crate::hooks::resolve"));
        assert_eq!(
            config.patterns,
            [
                Pattern::Fn("parse".into()),
                Pattern::Fn("walk".into()),
                Pattern::Class("Walker".into()),
                Pattern::Mod("db".into()),
            ]
        );
        assert_eq!(config.exclude, ["mini::vendor"]);
        assert_eq!(config.cache_dir, Some(PathBuf::from("target/weave/cache")));

        let options = config.options().unwrap();
        assert_eq!(options.resolver_module().as_deref(), Some("hooks"));
        assert!(options.filter.accepts(Some("db::Walker"), "parse"));
        assert!(!options.filter.accepts(Some("Walker"), "parse"));
        assert!(!options.filter.accepts(None, "db::parse"));
    }

    #[test]
    fn wrong_types_are_rejected() {
        let err = parse("[package.metadata.weave]\nfunctions = \"walk\"\n").unwrap_err();
        assert!(
            err.to_string().contains("weave.functions must be an array"),
            "unexpected error: {err}"
        );
        let err = parse("[package.metadata.weave]\nresolver = 3\n").unwrap_err();
        assert!(err.to_string().contains("weave.resolver must be a string"));
    }

    #[test]
    fn invalid_resolver_path() {
        let config = Config {
            resolver: Some("not a path".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.resolver_path(),
            Err(Error::InvalidResolver { .. })
        ));
    }

    #[test]
    fn cli_values_layer_over_manifest() {
        let manifest = Config {
            resolver: Some("crate::hooks::resolve".into()),
            patterns: vec![Pattern::Fn("walk".into())],
            exclude: vec!["mini::vendor".into()],
            cache_dir: None,
        };
        let cli = Config {
            resolver: None,
            patterns: vec![Pattern::Mod("db".into())],
            exclude: vec!["mini::gen".into()],
            cache_dir: Some(PathBuf::from("/tmp/cache")),
        };
        let merged = manifest.merge(cli);
        assert_eq!(merged.resolver.as_deref(), Some("crate::hooks::resolve"));
        assert_eq!(merged.patterns.len(), 2);
        assert_eq!(merged.exclude, ["mini::vendor", "mini::gen"]);
        assert_eq!(merged.cache_dir, Some(PathBuf::from("/tmp/cache")));
    }
}
