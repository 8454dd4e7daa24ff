use serde::{Deserialize, Serialize};

/// Top-level system configuration, deserialized from system.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemConfig {
    pub llm: LlmConfig,
    pub embeddings: EmbeddingConfig,
    pub retry: RetryDefaults,
    pub rate_limit: RateLimitConfig,
    pub pipeline: PipelineConfig,
    pub screening: ScreeningConfig,
    pub retrieval: RetrievalConfig,
    pub cache: CacheConfig,
}

/// LLM provider and model configuration per pipeline stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub decompose: LlmRoleConfig,
    pub checkworthy: LlmRoleConfig,
    pub query_generation: LlmRoleConfig,
    pub claim_verify: LlmRoleConfig,
    /// Used for source credibility lookups and coreference clustering.
    pub screening: LlmRoleConfig,
}

/// Configuration for a single LLM role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmRoleConfig {
    /// Provider name ("openai" or any OpenAI-compatible gateway).
    pub provider: String,
    /// Model identifier (e.g. "gpt-4o-mini").
    pub model: String,
    /// Max tokens in the response.
    pub max_tokens: u32,
    /// Temperature (0.0–2.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Optional base URL override for OpenAI-compatible endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-call timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
}

fn default_llm_timeout() -> u64 {
    60
}

/// Embedding model configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name ("openai").
    pub provider: String,
    /// Model identifier (e.g. "text-embedding-3-small").
    pub model: String,
    /// Embedding vector dimensions.
    pub dimensions: u32,
    /// Max texts per batch API call.
    pub batch_size: u32,
}

/// Default retry parameters per external target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryDefaults {
    pub llm_api: RetryConfig,
    pub embeddings: RetryConfig,
    pub external_modules: RetryConfig,
}

/// Retry configuration for a specific target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

/// Sliding-window limits shared by every stage talking to the same LLM backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted (in flight or recently started) within one window.
    pub llm_max_requests: u32,
    pub llm_window_seconds: u64,
}

/// Pipeline-wide knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attempts (each with a fresh seed) for structured LLM responses.
    pub num_seed_retries: u32,
    /// Upper bound on queries per claim, including the claim itself.
    pub max_queries_per_claim: usize,
    /// Cosine similarity at or above which two claims are considered duplicates.
    pub dedup_threshold: f64,
    /// Max concurrent work items inside a fan-out stage.
    pub max_concurrency: usize,
}

/// Screening gate parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScreeningConfig {
    /// Sensationalism score above which a low-trust document exits early.
    pub sensationalism_threshold: f64,
    pub uppercase_weight: f64,
    pub keyword_weight: f64,
    pub entropy_weight: f64,
    pub concentration_weight: f64,
    /// Corpus baseline for token entropy (bits).
    pub entropy_mean: f64,
    pub entropy_std: f64,
    /// Number of most distinctive terms used for term concentration.
    pub top_k_terms: usize,
    /// Optional `term<TAB>idf` file; uniform weights when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idf_path: Option<String>,
    #[serde(default = "default_sensational_keywords")]
    pub sensational_keywords: Vec<String>,
    /// Neighbours consulted by the screening advisor.
    pub advisor_neighbors: usize,
    /// Max cosine distance for an advisor neighbour to count.
    pub advisor_max_distance: f64,
}

fn default_sensational_keywords() -> Vec<String> {
    [
        "shocking",
        "amazing",
        "unbelievable",
        "secret",
        "exposed",
        "bombshell",
        "outrage",
        "miracle",
        "agenda",
        "conspiracy",
        "cover-up",
        "hoax",
        "scandal",
        "mind-blowing",
        "must-see",
        "breaking",
        "urgent",
        "warning",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Evidence retrieval parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Max cosine distance for a semantic-cache passage to be accepted.
    pub cache_distance_threshold: f64,
    /// Evidence count below which live web search is used.
    pub target_evidence_count: usize,
    pub max_search_results_per_query: usize,
    /// Sliding window length in sentences.
    pub sentences_per_passage: usize,
    /// Sliding window stride in sentences (must be < window).
    pub sliding_distance: usize,
    pub max_passages_per_url: usize,
    pub max_passages_per_claim: usize,
    pub min_sentence_chars: usize,
    pub max_sentence_chars: usize,
    pub fetch_timeout_ms: u64,
    pub fetch_attempts: u32,
}

/// Cache and semantic-collection configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries kept by each stage's in-process memo cache.
    pub memo_capacity: usize,
    /// Domains kept by the in-process source credibility cache.
    #[serde(default = "default_source_cache_capacity")]
    pub source_cache_capacity: usize,
    /// Max cosine distance for a previously verified claim to be reused.
    pub verdict_distance_threshold: f64,
    pub passages_collection: String,
    pub verdicts_collection: String,
    pub advisor_collection: String,
}

fn default_source_cache_capacity() -> usize {
    4096
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_role_defaults() {
        let role: LlmRoleConfig = toml::from_str(
            r#"
            provider = "openai"
            model = "gpt-4o-mini"
            max_tokens = 1024
            "#,
        )
        .unwrap();

        assert_eq!(role.timeout_seconds, 60);
        assert!(role.temperature.is_none());
        assert!(role.base_url.is_none());
    }

    #[test]
    fn test_default_keywords_present() {
        let keywords = default_sensational_keywords();
        assert!(keywords.iter().any(|k| k == "bombshell"));
        assert_eq!(keywords.len(), 18);
    }
}
