//! OpenAI-style embedding backend.
//!
//! Honors a requested `dimensions` option and adapts the declared dimension
//! when the provider returns something else.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use quarry_core::{defaults, Error, Result};

use crate::backend::EmbeddingBackend;
use crate::retry::parse_retry_after;

/// OpenAI-compatible embedding backend.
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: AtomicUsize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl OpenAiEmbedder {
    /// Create a backend with default base URL, model, and dimension.
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_config(
            defaults::OPENAI_BASE_URL.to_string(),
            api_key,
            defaults::OPENAI_EMBED_MODEL.to_string(),
            defaults::OPENAI_EMBED_DIMENSION,
        )
    }

    /// Create a backend with custom configuration.
    pub fn with_config(
        base_url: String,
        api_key: String,
        model: String,
        dimension: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::EMBED_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model,
            dimension: AtomicUsize::new(dimension),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    #[instrument(skip(self, texts), fields(subsystem = "embed", component = "openai", op = "embed_batch", model = %self.model, input_count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimension.load(Ordering::Relaxed),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(Error::Provider {
                status: status.as_u16(),
                message,
                retry_after,
            });
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        let mut data = body.data;
        data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        if vectors.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "Provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }

        if let Some(first) = vectors.first() {
            let declared = self.dimension.load(Ordering::Relaxed);
            if first.len() != declared {
                warn!(
                    subsystem = "embed",
                    component = "openai",
                    declared,
                    actual = first.len(),
                    "Provider dimension differs from configured, adopting it"
                );
                self.dimension.store(first.len(), Ordering::Relaxed);
            }
        }

        debug!(
            subsystem = "embed",
            component = "openai",
            input_count = texts.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding batch complete"
        );
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
