//! Core types, configuration, and error handling for Atlas.
//!
//! This crate provides the shared foundation used by all other Atlas crates:
//! - [`AtlasError`] — unified error type using `thiserror`
//! - [`AtlasConfig`] — configuration loaded from `.atlas.toml`
//! - Shared types: [`LineSpan`], [`RepoMetadata`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{AtlasConfig, GraphConfig, RepoMapConfig, WalkConfig};
pub use error::AtlasError;
pub use types::{LineSpan, OutputFormat, RepoMetadata};

/// A convenience `Result` type for Atlas operations.
pub type Result<T> = std::result::Result<T, AtlasError>;
