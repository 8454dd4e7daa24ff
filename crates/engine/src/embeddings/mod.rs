mod openai;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use claimcheck_common::config::{EmbeddingConfig, RetryConfig};

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::Backoff;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for computing text embeddings via an external API.
pub struct EmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
    retry_config: RetryConfig,
    api_key: String,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding API HTTP error: {0}")]
    Http(String),

    #[error("Embedding API auth error: {0}")]
    Auth(String),

    #[error("Embedding API rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: u32, got: usize },

    #[error("Embedding API error: {0}")]
    Api(String),

    #[error("Embedding circuit breaker open")]
    CircuitOpen,
}

impl From<EmbeddingError> for claimcheck_common::ClaimCheckError {
    fn from(e: EmbeddingError) -> Self {
        claimcheck_common::ClaimCheckError::Embedding(e.to_string())
    }
}

impl EmbeddingClient {
    /// Create a new embedding client.
    /// Reads the API key from `OPENAI_API_KEY` env var.
    /// Returns None if the key is not set.
    pub fn new(
        config: EmbeddingConfig,
        retry_config: RetryConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Option<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!("OPENAI_API_KEY not set, embedding client disabled");
                return None;
            }
        };

        let base_url = std::env::var("EMBEDDINGS_BASE_URL")
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());

        Some(Self {
            http: reqwest::Client::new(),
            config,
            retry_config,
            api_key,
            base_url,
            breaker,
        })
    }

    /// Embed a batch of texts. Splits into sub-batches per config.batch_size.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = (self.config.batch_size as usize).max(1);
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(batch_size) {
            let embeddings = self.call_api(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    /// Get the configured embedding dimensions.
    pub fn dimensions(&self) -> u32 {
        self.config.dimensions
    }

    /// Call the embedding API with retry logic.
    async fn call_api(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if !self.breaker.allow() {
            return Err(EmbeddingError::CircuitOpen);
        }

        let mut backoff = Backoff::new(&self.retry_config);

        loop {
            let attempt = backoff.next_attempt();
            match openai::call_openai_embeddings(
                &self.http,
                &self.base_url,
                &self.api_key,
                &self.config.model,
                self.config.dimensions,
                texts,
            )
            .await
            {
                Ok(embeddings) => {
                    self.breaker.record_success();
                    return Ok(embeddings);
                }
                Err(e @ EmbeddingError::Auth(_)) | Err(e @ EmbeddingError::DimensionMismatch { .. }) => {
                    metrics::counter!("embedding.api.errors").increment(1);
                    return Err(e);
                }
                Err(e) if backoff.exhausted() => {
                    metrics::counter!("embedding.api.errors").increment(1);
                    self.breaker.record_failure();
                    return Err(e);
                }
                Err(EmbeddingError::RateLimited { retry_after }) => {
                    let wait = backoff.delay_after(retry_after);
                    tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, "Rate limited, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    let wait = backoff.delay();
                    tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, error = %e, "Embedding API error, retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

/// Object-safe embedding capability. Deterministic for a fixed model version.
pub trait Embedder: Send + Sync {
    fn embed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send + 'a>>;
}

impl Embedder for EmbeddingClient {
    fn embed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send + 'a>> {
        Box::pin(self.embed_batch(texts))
    }
}

/// Embed a single text.
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let texts = [text.to_string()];
    embedder
        .embed(&texts)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| EmbeddingError::Api("Empty response from embedding API".into()))
}

/// Cosine similarity of two vectors; 0.0 when either is zero or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cosine distance (1 - similarity), the metric used by the vector indexes.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_cosine_distance() {
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_embed_one_uses_first_vector() {
        let embedder = mock::FixedEmbedder::with(&[("a", vec![1.0, 2.0])]);
        let v = embed_one(&embedder, "a").await.unwrap();
        assert_eq!(v, vec![1.0, 2.0]);
    }
}
