use std::future::Future;

use super::parse::ParseError;
use super::LlmError;

/// Seed of the first structured-output attempt; attempt `i` uses `BASE_SEED + i`.
const BASE_SEED: u64 = 42;

pub fn seed_for(attempt: u32) -> u64 {
    BASE_SEED + attempt as u64
}

/// Why a retried structured call ultimately failed.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl AttemptError {
    fn is_final(&self) -> bool {
        matches!(self, AttemptError::Llm(e) if e.is_non_retryable())
    }
}

/// Run `f` up to `attempts` times, passing the 0-based attempt index so the
/// caller can reseed. Returns the first success or the last failure.
/// Non-retryable LLM errors stop immediately.
pub async fn attempt<T, F, Fut>(attempts: u32, mut f: F) -> Result<T, AttemptError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let attempts = attempts.max(1);
    let mut last = None;

    for i in 0..attempts {
        match f(i).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_final() => return Err(e),
            Err(e) => {
                tracing::debug!(attempt = i + 1, error = %e, "Structured LLM call failed");
                last = Some(e);
            }
        }
    }

    Err(last.unwrap_or_else(|| ParseError("no attempts made".into()).into()))
}
