use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use claimcheck_common::types::StageUsage;
use serde::de::DeserializeOwned;

use super::attempt::{attempt, seed_for, AttemptError};
use super::memo::MemoCache;
use super::parse::{parse_json, ParseError};
use super::rate_limit::SlidingWindowLimiter;
use super::types::{ChatOptions, LlmResponse, Message, TokenUsage};
use super::{LlmCaller, LlmError};
use crate::circuit_breaker::CircuitBreaker;

#[derive(Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    system: String,
    messages: Vec<Message>,
    options: ChatOptions,
}

/// LLM access for one pipeline stage.
///
/// Wraps a caller with the backend's shared rate limiter and circuit breaker,
/// a per-call timeout, and a bounded memo cache keyed by the full request.
/// The memo is cleared whenever a call fails.
pub struct StageClient {
    caller: Arc<dyn LlmCaller>,
    limiter: Arc<SlidingWindowLimiter>,
    breaker: Arc<CircuitBreaker>,
    memo: Mutex<MemoCache<MemoKey, LlmResponse>>,
    timeout: Duration,
}

impl StageClient {
    pub fn new(
        caller: Arc<dyn LlmCaller>,
        limiter: Arc<SlidingWindowLimiter>,
        breaker: Arc<CircuitBreaker>,
        memo_capacity: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            caller,
            limiter,
            breaker,
            memo: Mutex::new(MemoCache::new(memo_capacity)),
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        self.caller.model()
    }

    /// Fresh usage meter labeled with this stage's model.
    #[cfg(test)]
    pub fn meter(&self) -> UsageMeter {
        UsageMeter::new(self.model())
    }

    /// One rate-limited, timed call. Memo hits report zero usage.
    pub async fn chat(
        &self,
        system: &str,
        messages: &[Message],
        options: ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        let key = MemoKey {
            system: system.to_string(),
            messages: messages.to_vec(),
            options,
        };

        if let Some(mut hit) = self.lock_memo().get(&key) {
            metrics::counter!("llm.memo.hit").increment(1);
            hit.usage = TokenUsage::default();
            return Ok(hit);
        }

        if !self.breaker.allow() {
            return Err(LlmError::CircuitOpen);
        }

        self.limiter.acquire().await;

        let call = self.caller.chat(system, messages, &options);
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout.as_secs())),
        };

        match result {
            Ok(response) => {
                self.breaker.record_success();
                self.lock_memo().insert(key, response.clone());
                Ok(response)
            }
            Err(e) => {
                if !e.is_non_retryable() {
                    self.breaker.record_failure();
                }
                self.lock_memo().clear();
                Err(e)
            }
        }
    }

    /// Ask for a JSON object and validate it, reseeding on every failed attempt.
    ///
    /// `validate` turns the strictly parsed payload into the stage's value, or
    /// rejects it (for example when an answer is missing) to trigger a retry.
    pub async fn complete_structured<T, U, F>(
        &self,
        system: &str,
        prompt: &str,
        attempts: u32,
        meter: &UsageMeter,
        validate: F,
    ) -> Result<U, AttemptError>
    where
        T: DeserializeOwned,
        F: Fn(T) -> Result<U, ParseError>,
    {
        let messages = [Message::user(prompt)];
        let messages = &messages;
        let validate = &validate;

        attempt(attempts, |i| async move {
            let options = ChatOptions {
                seed: Some(seed_for(i)),
                json_response: true,
            };
            let response = self.chat(system, messages, options).await?;
            meter.record(&response.usage);
            let parsed: T = parse_json(&response.text)?;
            Ok(validate(parsed)?)
        })
        .await
    }

    /// `complete_structured` without extra validation.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        system: &str,
        prompt: &str,
        attempts: u32,
        meter: &UsageMeter,
    ) -> Result<T, AttemptError> {
        self.complete_structured(system, prompt, attempts, meter, Ok)
            .await
    }

    fn lock_memo(&self) -> std::sync::MutexGuard<'_, MemoCache<MemoKey, LlmResponse>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accumulates token usage across concurrent calls of one stage.
pub struct UsageMeter {
    usage: Mutex<StageUsage>,
}

impl UsageMeter {
    pub fn new(model: &str) -> Self {
        Self {
            usage: Mutex::new(StageUsage {
                model: model.to_string(),
                ..StageUsage::default()
            }),
        }
    }

    pub fn record(&self, usage: &TokenUsage) {
        let mut total = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        total.prompt_tokens += usage.input_tokens;
        total.completion_tokens += usage.output_tokens;
    }

    pub fn snapshot(&self) -> StageUsage {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::llm::mock::ScriptedLlm;

    #[derive(Debug, Deserialize)]
    struct Answer {
        answer: String,
    }

    fn stage(llm: Arc<ScriptedLlm>) -> StageClient {
        StageClient::new(
            llm,
            Arc::new(SlidingWindowLimiter::new(100, Duration::from_secs(60))),
            Arc::new(CircuitBreaker::new("llm_api", 3, 60)),
            16,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_memo_hit_skips_backend() {
        let llm = Arc::new(ScriptedLlm::ok(&["first"]));
        let client = stage(llm.clone());
        let options = ChatOptions {
            seed: Some(1),
            json_response: false,
        };

        let a = client.chat("sys", &[Message::user("q")], options).await.unwrap();
        let b = client.chat("sys", &[Message::user("q")], options).await.unwrap();

        assert_eq!(a.text, b.text);
        assert_eq!(b.usage, TokenUsage::default());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_memo_cleared_on_error() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("cached".into()),
            Err(LlmError::Http("reset".into())),
            Ok("fresh".into()),
        ]));
        let client = stage(llm.clone());
        let opts = |seed| ChatOptions {
            seed: Some(seed),
            json_response: false,
        };

        client.chat("s", &[Message::user("a")], opts(1)).await.unwrap();
        assert!(client.chat("s", &[Message::user("b")], opts(1)).await.is_err());

        let again = client.chat("s", &[Message::user("a")], opts(1)).await.unwrap();
        assert_eq!(again.text, "fresh");
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_structured_retries_with_new_seed() {
        let llm = Arc::new(ScriptedLlm::ok(&["not json", "{\"answer\": \"ok\"}"]));
        let client = stage(llm.clone());
        let meter = client.meter();

        let parsed: Answer = client.complete_json("s", "q", 3, &meter).await.unwrap();

        assert_eq!(parsed.answer, "ok");
        assert_eq!(*llm.seeds.lock().unwrap(), vec![Some(42), Some(43)]);
        let usage = meter.snapshot();
        assert_eq!(usage.prompt_tokens, 20);
        assert_eq!(usage.completion_tokens, 10);
        assert_eq!(usage.model, "scripted");
    }

    #[tokio::test]
    async fn test_validation_failure_exhausts_attempts() {
        let llm = Arc::new(ScriptedLlm::ok(&["{\"answer\": \"\"}", "{\"answer\": \"\"}"]));
        let client = stage(llm.clone());
        let meter = client.meter();

        let result: Result<String, _> = client
            .complete_structured("s", "q", 2, &meter, |a: Answer| {
                if a.answer.is_empty() {
                    Err(ParseError("empty answer".into()))
                } else {
                    Ok(a.answer)
                }
            })
            .await;

        assert!(matches!(result, Err(AttemptError::Parse(_))));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast() {
        let llm = Arc::new(ScriptedLlm::ok(&["never"]));
        let breaker = Arc::new(CircuitBreaker::new("llm_api", 1, 600));
        breaker.record_failure();
        let client = StageClient::new(
            llm.clone(),
            Arc::new(SlidingWindowLimiter::new(10, Duration::from_secs(60))),
            breaker,
            4,
            Duration::from_secs(5),
        );

        let result = client
            .chat("s", &[Message::user("q")], ChatOptions::default())
            .await;
        assert!(matches!(result, Err(LlmError::CircuitOpen)));
        assert_eq!(llm.calls(), 0);
    }
}
