use thiserror::Error;

/// Top-level error type for claim-check operations.
#[derive(Debug, Error)]
pub enum ClaimCheckError {
    // --- Hard dependency errors (pipeline cannot run) ---
    #[error("PostgreSQL error: {0}")]
    Postgres(String),

    #[error("LLM API error: {0}")]
    LlmApi(String),

    // --- Soft dependency errors (pipeline degrades) ---
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Embedding API error: {0}")]
    Embedding(String),

    #[error("Fetch service error: {0}")]
    Fetch(String),

    #[error("Reranker error: {0}")]
    Rerank(String),

    // --- Operational errors ---
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed model response: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl ClaimCheckError {
    /// Whether this error is from a hard dependency (the request cannot be served).
    pub fn is_hard_dependency(&self) -> bool {
        matches!(self, Self::Postgres(_) | Self::LlmApi(_))
    }

    /// Whether this error is from a soft dependency (the affected item is skipped).
    pub fn is_soft_dependency(&self) -> bool {
        matches!(
            self,
            Self::Redis(_) | Self::Embedding(_) | Self::Fetch(_) | Self::Rerank(_)
        )
    }

    /// Whether retrying the same call might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Fetch(_) | Self::Timeout(_) | Self::CircuitOpen(_) | Self::Rerank(_)
        ) || self.is_hard_dependency()
    }
}

/// Result type alias for claim-check operations.
pub type Result<T> = std::result::Result<T, ClaimCheckError>;
