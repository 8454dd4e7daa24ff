mod attempt;
mod memo;
mod openai;
mod parse;
mod rate_limit;
mod stage;
pub mod types;

use std::future::Future;
use std::pin::Pin;

use claimcheck_common::config::{LlmRoleConfig, RetryConfig};

use crate::retry::Backoff;

pub use attempt::{attempt, seed_for, AttemptError};
pub use memo::MemoCache;
pub use parse::{parse_json, strip_code_fences, ParseError};
pub use rate_limit::SlidingWindowLimiter;
pub use stage::{StageClient, UsageMeter};
pub use types::{ChatOptions, LlmResponse, Message, Role, StopReason, TokenUsage};

/// LLM API client with retry logic.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmRoleConfig,
    retry_config: RetryConfig,
    api_key: String,
    base_url: String,
}

/// Errors from LLM API calls.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM HTTP error: {0}")]
    Http(String),

    #[error("LLM auth error: {0}")]
    Auth(String),

    #[error("LLM rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("LLM context window exceeded: {0}")]
    ContextWindowExceeded(String),

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM response parse error: {0}")]
    Parse(String),

    #[error("LLM call timed out after {0}s")]
    Timeout(u64),

    #[error("LLM circuit breaker open")]
    CircuitOpen,
}

impl LlmError {
    /// Whether this error should not be retried.
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, LlmError::Auth(_) | LlmError::ContextWindowExceeded(_))
    }
}

impl From<LlmError> for claimcheck_common::ClaimCheckError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(_) => claimcheck_common::ClaimCheckError::Timeout(e.to_string()),
            LlmError::CircuitOpen => {
                claimcheck_common::ClaimCheckError::CircuitOpen("llm_api".into())
            }
            other => claimcheck_common::ClaimCheckError::LlmApi(other.to_string()),
        }
    }
}

impl LlmClient {
    /// Create a new LLM client.
    /// Reads the API key from `OPENAI_API_KEY`. Returns None if the key is not set.
    pub fn new(config: LlmRoleConfig, retry_config: RetryConfig) -> Option<Self> {
        if config.provider != "openai" {
            tracing::warn!(provider = %config.provider, "Unknown LLM provider");
            return None;
        }

        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!(
                    model = %config.model,
                    "OPENAI_API_KEY not set, LLM client disabled for this role"
                );
                return None;
            }
        };

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| openai::OPENAI_BASE_URL.to_string());

        Some(Self {
            http: reqwest::Client::new(),
            config,
            retry_config,
            api_key,
            base_url,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a chat request with retry logic.
    pub async fn chat(
        &self,
        system: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        let mut backoff = Backoff::new(&self.retry_config);

        loop {
            let attempt = backoff.next_attempt();
            let result = openai::send_chat_completion(
                &self.http,
                &self.base_url,
                &self.api_key,
                &self.config.model,
                self.config.max_tokens,
                self.config.temperature,
                system,
                messages,
                options,
            )
            .await;

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_non_retryable() || backoff.exhausted() => {
                    metrics::counter!("llm.api.errors", "provider" => self.config.provider.clone())
                        .increment(1);
                    return Err(e);
                }
                Err(LlmError::RateLimited { retry_after }) => {
                    let wait = backoff.delay_after(retry_after);
                    tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, "LLM rate limited, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    let wait = backoff.delay();
                    tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, error = %e, "LLM API error, retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

/// Object-safe trait for testability (dyn dispatch).
/// Tests provide scripted callers; production uses LlmClient.
pub trait LlmCaller: Send + Sync {
    fn chat<'a>(
        &'a self,
        system: &'a str,
        messages: &'a [Message],
        options: &'a ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>>;

    /// Model name reported in usage accounting.
    fn model(&self) -> &str;
}

impl LlmCaller for LlmClient {
    fn chat<'a>(
        &'a self,
        system: &'a str,
        messages: &'a [Message],
        options: &'a ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>> {
        Box::pin(self.chat(system, messages, options))
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
