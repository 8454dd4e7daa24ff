use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreaker;
use crate::embeddings::{cosine_similarity, Embedder};

#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Reranker returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Reranker returned {got} scores for {expected} passages")]
    CountMismatch { expected: usize, got: usize },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Reranker circuit breaker is open")]
    CircuitOpen,
}

impl From<RerankError> for claimcheck_common::ClaimCheckError {
    fn from(e: RerankError) -> Self {
        claimcheck_common::ClaimCheckError::Rerank(e.to_string())
    }
}

/// Relevance scoring of passages against a query. One score per passage,
/// higher is more relevant.
pub trait PassageReranker: Send + Sync {
    fn score<'a>(
        &'a self,
        query: &'a str,
        passages: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<f64>, RerankError>>;
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    truncate: bool,
}

#[derive(Deserialize)]
struct RerankHit {
    index: usize,
    score: f64,
}

/// Cross-encoder served over HTTP (`POST {base}/rerank`, TEI-compatible).
pub struct HttpReranker {
    http: reqwest::Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl HttpReranker {
    pub fn new(base_url: impl Into<String>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            breaker,
        }
    }

    async fn rerank(&self, query: &str, passages: &[String]) -> Result<Vec<f64>, RerankError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        if !self.breaker.allow() {
            return Err(RerankError::CircuitOpen);
        }

        let start = std::time::Instant::now();
        let response = self
            .http
            .post(format!("{}/rerank", self.base_url))
            .timeout(Duration::from_secs(30))
            .json(&RerankRequest {
                query,
                texts: passages,
                truncate: true,
            })
            .send()
            .await
            .map_err(|e| {
                self.breaker.record_failure();
                RerankError::Http(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            self.breaker.record_failure();
            let body = response.text().await.unwrap_or_default();
            return Err(RerankError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let hits: Vec<RerankHit> = response
            .json()
            .await
            .map_err(|e| RerankError::Http(format!("Failed to parse rerank response: {e}")))?;
        self.breaker.record_success();
        metrics::histogram!("rerank.api.latency").record(start.elapsed().as_secs_f64());

        scores_by_index(hits, passages.len())
    }
}

/// Reorder `{index, score}` hits into one score per passage.
fn scores_by_index(hits: Vec<RerankHit>, expected: usize) -> Result<Vec<f64>, RerankError> {
    let mut scores = vec![None; expected];
    for hit in &hits {
        if let Some(slot) = scores.get_mut(hit.index) {
            *slot = Some(hit.score);
        }
    }
    let got = scores.iter().filter(|s| s.is_some()).count();
    if got != expected {
        return Err(RerankError::CountMismatch { expected, got });
    }
    Ok(scores.into_iter().flatten().collect())
}

impl PassageReranker for HttpReranker {
    fn score<'a>(
        &'a self,
        query: &'a str,
        passages: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<f64>, RerankError>> {
        Box::pin(self.rerank(query, passages))
    }
}

/// Cosine similarity between query and passage embeddings.
pub struct EmbeddingReranker {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingReranker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

impl PassageReranker for EmbeddingReranker {
    fn score<'a>(
        &'a self,
        query: &'a str,
        passages: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<f64>, RerankError>> {
        Box::pin(async move {
            if passages.is_empty() {
                return Ok(Vec::new());
            }
            let mut texts = Vec::with_capacity(passages.len() + 1);
            texts.push(query.to_string());
            texts.extend(passages.iter().cloned());

            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| RerankError::Embedding(e.to_string()))?;
            let Some((query_vec, passage_vecs)) = vectors.split_first() else {
                return Err(RerankError::CountMismatch {
                    expected: passages.len(),
                    got: 0,
                });
            };
            if passage_vecs.len() != passages.len() {
                return Err(RerankError::CountMismatch {
                    expected: passages.len(),
                    got: passage_vecs.len(),
                });
            }
            Ok(passage_vecs
                .iter()
                .map(|v| cosine_similarity(query_vec, v))
                .collect())
        })
    }
}

/// Tries `primary`, then `fallback` when it fails.
pub struct FallbackReranker {
    primary: Arc<dyn PassageReranker>,
    fallback: Arc<dyn PassageReranker>,
}

impl FallbackReranker {
    pub fn new(primary: Arc<dyn PassageReranker>, fallback: Arc<dyn PassageReranker>) -> Self {
        Self { primary, fallback }
    }
}

impl PassageReranker for FallbackReranker {
    fn score<'a>(
        &'a self,
        query: &'a str,
        passages: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<f64>, RerankError>> {
        Box::pin(async move {
            match self.primary.score(query, passages).await {
                Ok(scores) => Ok(scores),
                Err(e) => {
                    tracing::warn!(error = %e, "Primary reranker failed, using fallback");
                    self.fallback.score(query, passages).await
                }
            }
        })
    }
}

/// Scores passages by the number of query terms they contain. Used when no
/// reranker or embedder is configured.
pub struct LexicalReranker;

impl PassageReranker for LexicalReranker {
    fn score<'a>(
        &'a self,
        query: &'a str,
        passages: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<f64>, RerankError>> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_lowercase)
            .collect();
        let scores = passages
            .iter()
            .map(|p| {
                let lowered = p.to_lowercase();
                terms.iter().filter(|t| lowered.contains(t.as_str())).count() as f64
            })
            .collect();
        Box::pin(async move { Ok(scores) })
    }
}
