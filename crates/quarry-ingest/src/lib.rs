//! # quarry-ingest
//!
//! Ingest orchestration and the service operation surface for quarry.
//!
//! [`Ingestor`] wires sitemap discovery, the bounded crawler, the chunker,
//! the rate-limited embedding client, and the vector store, and drives the
//! durable job state machine. [`DocService`] exposes the operations that
//! transports call: session linking, grants, ingest job control, and the
//! access-gated semantic query.

pub mod config;
pub mod orchestrator;
pub mod pdf;
pub mod service;

pub use config::IngestConfig;
pub use orchestrator::Ingestor;
pub use pdf::{extract_pdf, fetch_pdf_bytes, PdfDocument};
pub use service::{DocService, EmbeddingConfig};
