//! Load interception: decide per module whether it is woven, run the pass,
//! and deliver the result in place of the original source.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::modules::ModuleTree;
use crate::rewrite::{self, Options};

/// Namespaces never intercepted: the weaver itself and the syntax model it
/// is built on. Weaving them would make the weaver hook its own machinery.
pub const DEFAULT_EXCLUDED: &[&str] = &[
    "weave",
    "weave_runtime",
    "syn",
    "proc_macro2",
    "quote",
    "prettyplease",
];

/// How woven text is produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Run the pass on every load; nothing is persisted.
    #[default]
    Streaming,
    /// Materialize woven text under `dir` keyed by the module's absolute
    /// path. An existing artifact is reused without parsing the module, so
    /// an edited module keeps its old artifact until `refresh` is set.
    Cached { dir: PathBuf, refresh: bool },
}

/// What a load hands to the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Load {
    /// Nothing was hooked (or the module failed to parse): the original bytes.
    Original { path: PathBuf, bytes: Vec<u8> },
    /// Freshly woven text.
    Instrumented {
        path: PathBuf,
        source: String,
        wrapped: Vec<String>,
    },
    /// Text read back from a cached artifact.
    Cached {
        path: PathBuf,
        artifact: PathBuf,
        source: String,
    },
}

impl Load {
    /// Source file of the loaded module.
    pub fn path(&self) -> &Path {
        match self {
            Load::Original { path, .. }
            | Load::Instrumented { path, .. }
            | Load::Cached { path, .. } => path,
        }
    }

    /// The bytes the compiler sees.
    pub fn contents(&self) -> &[u8] {
        match self {
            Load::Original { bytes, .. } => bytes,
            Load::Instrumented { source, .. } | Load::Cached { source, .. } => source.as_bytes(),
        }
    }

    pub fn is_original(&self) -> bool {
        matches!(self, Load::Original { .. })
    }
}

/// Intercepts module loads for one crate target.
pub struct Interceptor<'a> {
    tree: &'a ModuleTree,
    options: Options,
    excluded: Vec<String>,
    strategy: Strategy,
}

impl<'a> Interceptor<'a> {
    /// Interceptor with the default exclusions plus the module defining an
    /// in-crate resolver. Types declared anywhere in the tree are made known
    /// to every module's weaving.
    pub fn new(tree: &'a ModuleTree, options: Options) -> Self {
        let options = options.with_types(tree.declared_types());
        let mut excluded: Vec<String> = DEFAULT_EXCLUDED.iter().map(|s| s.to_string()).collect();
        if let Some(module) = options.resolver_module()
            && !module.is_empty()
        {
            excluded.push(format!("{}::{module}", tree.crate_name()));
        }
        Self {
            tree,
            options,
            excluded,
            strategy: Strategy::default(),
        }
    }

    /// Also exclude `prefix` and every module under it.
    pub fn exclude(mut self, prefix: impl Into<String>) -> Self {
        self.excluded.push(prefix.into());
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn is_excluded(&self, module: &str) -> bool {
        self.excluded.iter().any(|prefix| {
            module == prefix
                || module
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with("::"))
        })
    }

    /// Load `module`.
    ///
    /// Returns `Ok(None)` when the module is excluded or not part of the
    /// tree; the compiler then reads it untouched. A module that fails to
    /// parse is delivered as its original bytes, never as an error.
    pub fn load(&self, module: &str) -> Result<Option<Load>, Error> {
        if self.is_excluded(module) {
            tracing::debug!(module, "excluded from weaving");
            return Ok(None);
        }
        let Some(path) = self.tree.find_file(module) else {
            return Ok(None);
        };

        let artifact = match &self.strategy {
            Strategy::Streaming => None,
            Strategy::Cached { dir, refresh } => {
                let artifact = dir.join(cache_file_name(&path)?);
                if !refresh && artifact.is_file() {
                    let source =
                        std::fs::read_to_string(&artifact).map_err(|source| Error::ReadError {
                            path: artifact.clone(),
                            source,
                        })?;
                    tracing::debug!(module, artifact = %artifact.display(), "cache hit");
                    return Ok(Some(Load::Cached {
                        path,
                        artifact,
                        source,
                    }));
                }
                Some(artifact)
            }
        };

        let bytes = std::fs::read(&path).map_err(|source| Error::ReadError {
            path: path.clone(),
            source,
        })?;
        let source = match String::from_utf8(bytes) {
            Ok(source) => source,
            Err(e) => {
                tracing::debug!(module, "not valid UTF-8, delivering original");
                return Ok(Some(Load::Original {
                    path,
                    bytes: e.into_bytes(),
                }));
            }
        };

        let options = self.options.for_module(self.tree.namespace_of(module));
        let result = match rewrite::instrument_source(&source, &options) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(module, error = %e, "parse failed, delivering original");
                return Ok(Some(Load::Original {
                    path,
                    bytes: source.into_bytes(),
                }));
            }
        };

        if !result.hooked {
            tracing::debug!(module, "nothing to weave");
            if let Some(stale) = artifact.filter(|a| a.is_file()) {
                std::fs::remove_file(&stale)?;
            }
            return Ok(Some(Load::Original {
                path,
                bytes: source.into_bytes(),
            }));
        }
        if let Some(artifact) = &artifact {
            write_artifact(artifact, &result.source)?;
        }
        Ok(Some(Load::Instrumented {
            path,
            source: result.source,
            wrapped: result.wrapped,
        }))
    }
}

/// Artifact name for the module stored at `path`:
/// `generated-<hex sha256 of the absolute path>.rs`.
pub fn cache_file_name(path: &Path) -> Result<String, Error> {
    let absolute = std::path::absolute(path)?;
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    Ok(format!("generated-{}.rs", hex::encode(digest)))
}

fn write_artifact(artifact: &Path, source: &str) -> Result<(), Error> {
    if let Some(parent) = artifact.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(artifact, source).map_err(|source| Error::WriteError {
        path: artifact.to_path_buf(),
        source,
    })
}

/// Write a load over the staged copy of its file, at the same path
/// relative to the project, so it compiles under its original module
/// identity. Original loads leave the staged copy untouched.
///
/// Returns the staged path written, if any.
pub fn deliver(load: &Load, project: &Path, staging: &Path) -> Result<Option<PathBuf>, Error> {
    if load.is_original() {
        return Ok(None);
    }
    let relative = load
        .path()
        .strip_prefix(project)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let staged = staging.join(relative);
    std::fs::write(&staged, load.contents()).map_err(|source| Error::WriteError {
        path: staged.clone(),
        source,
    })?;
    Ok(Some(staged))
}
