//! Google-style embedding backend.
//!
//! The provider chooses the output dimension; the client adopts it and
//! L2-normalizes returned vectors that are not already unit length.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use quarry_core::{defaults, Error, Result};

use crate::backend::EmbeddingBackend;
use crate::retry::parse_retry_after;

/// Norm deviation beyond which a returned vector is re-normalized.
const NORM_EPSILON: f32 = 1e-3;

/// Gemini embedding backend.
pub struct GeminiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: AtomicUsize,
}

#[derive(Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

impl GeminiEmbedder {
    /// Create a backend with default base URL, model, and dimension.
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_config(
            defaults::GEMINI_BASE_URL.to_string(),
            api_key,
            defaults::GEMINI_EMBED_MODEL.to_string(),
            defaults::GEMINI_EMBED_DIMENSION,
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
impl EmbeddingBackend for GeminiEmbedder {
    #[instrument(skip(self, texts), fields(subsystem = "embed", component = "gemini", op = "embed_batch", model = %self.model, input_count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: format!("models/{}", self.model),
                    content: Content {
                        parts: vec![Part { text: text.clone() }],
                    },
                })
                .collect(),
        };

        let response = self
            .client
            .post(format!(
                "{}/models/{}:batchEmbedContents",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
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
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                status: status.as_u16(),
                message,
                retry_after,
            });
        }

        let body: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        let vectors: Vec<Vec<f32>> = body
            .embeddings
            .into_iter()
            .map(|e| l2_normalize(e.values))
            .collect();

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
                    component = "gemini",
                    declared,
                    actual = first.len(),
                    "Provider dimension differs from configured, adopting it"
                );
                self.dimension.store(first.len(), Ordering::Relaxed);
            }
        }

        debug!(
            subsystem = "embed",
            component = "gemini",
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

/// Normalize a vector to unit length unless it already is (or is zero).
fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && (norm - 1.0).abs() > NORM_EPSILON {
        for v in &mut values {
            *v /= norm;
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_l2_normalize_scales_to_unit() {
        let normalized = l2_normalize(vec![3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_leaves_unit_vectors() {
        let unit = vec![0.6, 0.8];
        assert_eq!(l2_normalize(unit.clone()), unit);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_embed_batch_normalizes_and_adapts_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/test-model:batchEmbedContents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embeddings": [{"values": [3.0, 4.0]}]
            })))
            .mount(&server)
            .await;

        let embedder = GeminiEmbedder::with_config(
            server.uri(),
            "test-key".to_string(),
            "test-model".to_string(),
            768,
        )
        .unwrap();

        let vectors = embedder.embed_batch(&["hello".to_string()]).await.unwrap();
        assert!((vectors[0][0] - 0.6).abs() < 1e-6);
        assert!((vectors[0][1] - 0.8).abs() < 1e-6);
        assert_eq!(embedder.dimension(), 2);
    }

    #[tokio::test]
    async fn test_server_error_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let embedder = GeminiEmbedder::with_config(
            server.uri(),
            "test-key".to_string(),
            "test-model".to_string(),
            768,
        )
        .unwrap();

        let err = embedder.embed_batch(&["x".to_string()]).await.unwrap_err();
        assert!(err.is_retryable());
        match err {
            Error::Provider { status, .. } => assert_eq!(status, 503),
            other => panic!("expected provider error, got {:?}", other),
        }
    }
}
