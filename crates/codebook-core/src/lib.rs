//! Codebook core library: time-versioned hierarchical code taxonomies.
//!
//! A codebook relates codes to parents through relations that are valid
//! during a window of time. This crate resolves those relations into the
//! hierarchy in effect at any instant, materializes it as a sorted tree
//! with cycle checks, caches codes and labels so repeated traversals do
//! not hit the backing store, and keeps that cache consistent through the
//! mutation API.
//!
//! Storage sits behind [`store::CodebookStore`]; an in-memory store and a
//! SQLite store are provided.

pub mod codebook;
pub mod config;
pub mod errors;
pub mod export;
pub mod models;
pub mod store;

pub use codebook::{Codebook, Hierarchy, TreeItem};
pub use config::CodebookConfig;
pub use errors::{CodebookError, CodebookResult};
pub use models::{Code, CodebookCode, NewCodebookCode};
