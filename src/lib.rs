pub mod build;
pub mod config;
pub mod error;
pub mod filter;
pub mod intercept;
pub mod modules;
pub mod rewrite;
mod wrapper;
