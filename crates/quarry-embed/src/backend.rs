//! Embedding backend capability surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use quarry_core::Result;

use crate::gemini::GeminiEmbedder;
use crate::openai::OpenAiEmbedder;

/// Capability set every embedding backend provides.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    /// An empty batch returns an empty list without a network call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Current declared vector dimension. Updated when the provider's
    /// actual output differs from the configured value.
    fn dimension(&self) -> usize;

    /// Model identifier sent to the provider.
    fn model(&self) -> &str;
}

/// Which provider style an embedder uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-style: caller requests a dimension.
    OpenAi,
    /// Google-style: provider chooses the dimension; vectors are
    /// L2-normalized client-side when needed.
    Gemini,
}

impl std::fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(format!("Invalid embedding provider: {}", s)),
        }
    }
}

/// The configured embedding client: one variant per provider style, with
/// per-variant state. No trait objects cross the service boundary.
pub enum Embedder {
    OpenAi(OpenAiEmbedder),
    Gemini(GeminiEmbedder),
}

impl Embedder {
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self {
            Embedder::OpenAi(inner) => inner.embed_batch(texts).await,
            Embedder::Gemini(inner) => inner.embed_batch(texts).await,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Embedder::OpenAi(inner) => inner.dimension(),
            Embedder::Gemini(inner) => inner.dimension(),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Embedder::OpenAi(inner) => inner.model(),
            Embedder::Gemini(inner) => inner.model(),
        }
    }

    pub fn provider(&self) -> EmbeddingProvider {
        match self {
            Embedder::OpenAi(_) => EmbeddingProvider::OpenAi,
            Embedder::Gemini(_) => EmbeddingProvider::Gemini,
        }
    }
}
