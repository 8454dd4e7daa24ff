use std::hash::{Hash, Hasher};
use std::time::Duration;

use claimcheck_common::config::RetryConfig;

/// Exponential backoff state for one retried call.
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    attempt: u32,
    backoff_ms: u64,
}

impl<'a> Backoff<'a> {
    pub fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            backoff_ms: config.initial_backoff_ms,
        }
    }

    /// Start the next attempt. Returns its 1-based number.
    pub fn next_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    /// Delay before the next attempt; advances the backoff.
    pub fn delay(&mut self) -> Duration {
        let jitter = if self.config.jitter {
            compute_jitter(self.attempt, self.backoff_ms)
        } else {
            0
        };
        let wait = self.backoff_ms + jitter;
        self.backoff_ms = (self.backoff_ms as f64 * self.config.backoff_multiplier) as u64;
        self.backoff_ms = self.backoff_ms.min(self.config.max_backoff_ms);
        Duration::from_millis(wait)
    }

    /// Delay honouring a server-provided Retry-After, falling back to backoff.
    pub fn delay_after(&mut self, retry_after_secs: Option<u64>) -> Duration {
        match retry_after_secs {
            Some(s) => Duration::from_secs(s),
            None => self.delay(),
        }
    }
}

/// Compute jitter for retry backoff using simple hash-based approach.
fn compute_jitter(attempt: u32, backoff_ms: u64) -> u64 {
    let mut hasher = std::hash::DefaultHasher::new();
    attempt.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    hasher.finish() % (backoff_ms / 2 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: bool) -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 300,
            backoff_multiplier: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let cfg = config(false);
        let mut b = Backoff::new(&cfg);
        assert_eq!(b.delay(), Duration::from_millis(100));
        assert_eq!(b.delay(), Duration::from_millis(200));
        assert_eq!(b.delay(), Duration::from_millis(300));
        assert_eq!(b.delay(), Duration::from_millis(300));
    }

    #[test]
    fn test_exhaustion() {
        let cfg = config(false);
        let mut b = Backoff::new(&cfg);
        b.next_attempt();
        b.next_attempt();
        assert!(!b.exhausted());
        b.next_attempt();
        assert!(b.exhausted());
    }

    #[test]
    fn test_jitter_bounded() {
        for attempt in 1..20 {
            assert!(compute_jitter(attempt, 100) <= 50);
        }
    }

    #[test]
    fn test_retry_after_overrides() {
        let cfg = config(true);
        let mut b = Backoff::new(&cfg);
        assert_eq!(b.delay_after(Some(2)), Duration::from_secs(2));
    }
}
