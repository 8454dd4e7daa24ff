use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window limiter shared by every caller of one backend.
///
/// At most `max_requests` calls may start within any rolling `window`.
/// Callers over the limit wait; they never fail.
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    started: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            window,
            started: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a slot is free, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut started = self.started.lock().await;
                let now = Instant::now();
                while started
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.window)
                {
                    started.pop_front();
                }

                if started.len() < self.max_requests {
                    started.push_back(now);
                    return;
                }

                match started.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            metrics::counter!("llm.rate_limit.waits").increment(1);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limit window full, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests started within the current window.
    #[cfg(test)]
    pub async fn in_window(&self) -> usize {
        let started = self.started.lock().await;
        let now = Instant::now();
        started
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}
