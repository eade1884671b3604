//! Structured logging field name constants for quarry.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, job transitions, operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (pages, chunks) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "crawl", "embed", "db", "ingest"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "crawler", "sitemap", "limiter", "vector_store", "orchestrator"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "crawl", "embed_batch", "ensure_store", "flush"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Indexing job id being processed.
pub const JOB_ID: &str = "job_id";

/// Index name being operated on.
pub const INDEX_NAME: &str = "index_name";

/// URL being fetched or stored.
pub const URL: &str = "url";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of pages seen so far.
pub const PAGE_COUNT: &str = "page_count";

/// Number of chunks processed (chunking, embedding, upserts).
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of input texts sent to an embedding provider.
pub const INPUT_COUNT: &str = "input_count";

/// Number of results returned by a search.
pub const RESULT_COUNT: &str = "result_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
