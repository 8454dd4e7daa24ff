use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Per-host token bucket limiter for outbound page fetches.
pub struct HostRateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    rate: f64,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    rate: f64, // tokens per second
}

impl TokenBucket {
    fn new(rate: f64) -> Self {
        Self {
            tokens: rate.max(1.0),
            last_refill: Instant::now(),
            rate,
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        // Burst of two seconds' worth, never less than one request.
        let burst = (self.rate * 2.0).max(1.0);
        self.tokens = (self.tokens + elapsed * self.rate).min(burst);
        self.last_refill = Instant::now();
    }

    /// Take a token, or report how long until one is available.
    fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("rate limit wait for {host} exceeds {timeout:?}")]
pub struct RateLimitError {
    pub host: String,
    pub timeout: Duration,
}

impl HostRateLimiter {
    /// `rate` is requests per second per host; non-positive values fall back to 1.
    pub fn new(rate: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate: if rate > 0.0 { rate } else { 1.0 },
        }
    }

    /// Wait for a permit for `host`. Fails without waiting if the next
    /// permit lies beyond `timeout`.
    pub async fn acquire(&self, host: &str, timeout: Duration) -> Result<(), RateLimitError> {
        let deadline = Instant::now() + timeout;

        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(host.to_string())
                    .or_insert_with(|| TokenBucket::new(self.rate));

                match bucket.try_acquire() {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            if Instant::now() + wait > deadline {
                metrics::counter!("fetch.rate_limit.rejected").increment(1);
                return Err(RateLimitError {
                    host: host.to_string(),
                    timeout,
                });
            }

            tokio::time::sleep(wait).await;
        }
    }
}
