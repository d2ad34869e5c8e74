use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: syn::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {}: {reason}", path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("invalid resolver path '{path}': {reason}")]
    InvalidResolver { path: String, reason: String },

    #[error("no crate root found in {} -- expected src/lib.rs, src/main.rs or src/bin/", .0.display())]
    NoCrateRoots(PathBuf),

    #[error("could not find Cargo.toml in {} or any parent directory", .0.display())]
    NoProjectFound(PathBuf),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("run failed: {0}")]
    RunFailed(String),

    #[error("no woven binary found -- run `weave build` first")]
    NoBinary,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
