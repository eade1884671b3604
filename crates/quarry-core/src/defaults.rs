//! Centralized default constants for the quarry system.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates and the service layer reference these constants instead of
//! defining their own magic numbers.

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum characters per chunk for text splitting.
pub const CHUNK_SIZE: usize = 1500;

/// Overlap characters between adjacent windows of an oversized paragraph.
pub const CHUNK_OVERLAP: usize = 150;

// =============================================================================
// CRAWLING
// =============================================================================

/// Maximum pages fetched in a single crawl.
pub const MAX_PAGES: usize = 10_000;

/// Per-request HTTP timeout in milliseconds.
pub const HTTP_TIMEOUT_MS: u64 = 30_000;

/// Maximum redirects followed per request.
pub const MAX_REDIRECTS: usize = 5;

/// User agent sent by the crawler and the PDF fetcher.
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; QuarryBot/1.0; +https://github.com/quarry-search/quarry)";

/// Maximum sitemap files expanded per discovery (bounds index recursion).
pub const SITEMAP_MAX_FILES: usize = 50;

/// URL patterns never enqueued unless overridden by an explicit include.
///
/// Covers authentication pages, category/tag/feed listings, and non-HTML
/// media descriptors.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    r"/(login|logout|signin|signout|signup|register)(/|$)",
    r"/(category|categories|tag|tags|author)/",
    r"/(feed|rss|atom)(/|$)",
    r"\.(rss|atom|xml|json)$",
];

/// Fallback crawler concurrency when CPU detection fails.
pub const FALLBACK_CPU_COUNT: usize = 8;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Chunks per embedding call.
pub const EMBED_BATCH_SIZE: usize = 32;

/// Requests-per-minute window for the embedding limiter.
pub const EMBED_RPM: u64 = 3_000;

/// Tokens-per-minute window for the embedding limiter.
pub const EMBED_TPM: u64 = 1_000_000;

/// Tokens-per-day window for the embedding limiter.
pub const EMBED_TPD: u64 = 50_000_000;

/// Maximum retries for transient provider failures.
pub const EMBED_MAX_RETRIES: u32 = 5;

/// Initial backoff before the first retry, in milliseconds.
pub const EMBED_INITIAL_BACKOFF_MS: u64 = 1_000;

/// Upper bound of the random jitter added to computed backoffs, in ms.
pub const BACKOFF_JITTER_MS: u64 = 250;

/// Default OpenAI-compatible API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default OpenAI embedding model.
pub const OPENAI_EMBED_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension for text-embedding-3-small.
pub const OPENAI_EMBED_DIMENSION: usize = 1536;

/// Default Gemini API base URL.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default Gemini embedding model.
pub const GEMINI_EMBED_MODEL: &str = "text-embedding-004";

/// Default embedding dimension for text-embedding-004.
pub const GEMINI_EMBED_DIMENSION: usize = 768;

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// JOBS
// =============================================================================

/// Overall deadline for one ingest attempt, in seconds.
pub const JOB_DEADLINE_SECS: u64 = 3_600;

/// Maximum jobs returned by a list call.
pub const JOB_LIST_LIMIT: i64 = 50;

/// How often progress counters are persisted to the job row, in seconds.
pub const PROGRESS_PERSIST_SECS: u64 = 5;

/// Terminal jobs older than this many days are pruned.
pub const JOB_RETENTION_DAYS: i32 = 30;

// =============================================================================
// ACCESS
// =============================================================================

/// Idle window after which session links are garbage-collected, in days.
pub const SESSION_IDLE_DAYS: i64 = 30;

/// Snippet length in characters for search results.
pub const SNIPPET_LENGTH: usize = 500;

/// Smallest accepted top-k for semantic search.
pub const SEARCH_K_MIN: i64 = 1;

/// Largest accepted top-k for semantic search.
pub const SEARCH_K_MAX: i64 = 50;

// =============================================================================
// DISTRIBUTED LIMITER
// =============================================================================

/// Advisory lock key serializing cross-process embedding admission.
pub const EMBED_RATE_LOCK_KEY: i64 = 823_563_941;

/// Largest vector dimension the IVFFlat fallback index supports.
pub const IVFFLAT_MAX_DIMENSION: usize = 2_000;

/// IVFFlat list count for the fallback ANN index.
pub const IVFFLAT_LISTS: i32 = 100;
