//! # quarry-core
//!
//! Core types, errors, and text processing for the quarry documentation
//! search service.
//!
//! This crate provides the foundational data structures that the crawl,
//! embedding, database, and ingest crates depend on.

pub mod chunker;
pub mod defaults;
pub mod error;
pub mod index_name;
pub mod logging;
pub mod models;
pub mod tokens;

// Re-export commonly used types at crate root
pub use chunker::{chunk_text, split_paragraphs, ChunkerConfig};
pub use error::{Error, Result};
pub use index_name::derive_index_name;
pub use models::*;
pub use tokens::{estimate_batch_tokens, estimate_tokens};
