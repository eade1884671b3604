//! # quarry-embed
//!
//! Embedding providers and admission control for quarry:
//!
//! - OpenAI-style and Google-style batch embedding clients
//! - A windowed RPM/TPM/TPD rate limiter with FIFO admission
//! - Retry-with-backoff honoring `Retry-After`

pub mod backend;
pub mod gemini;
pub mod limiter;
pub mod openai;
pub mod retry;

pub use backend::{Embedder, EmbeddingBackend, EmbeddingProvider};
pub use gemini::GeminiEmbedder;
pub use limiter::{RateLimitConfig, RateLimiter};
pub use openai::OpenAiEmbedder;
pub use retry::{parse_retry_after, with_retry, RetryPolicy};
