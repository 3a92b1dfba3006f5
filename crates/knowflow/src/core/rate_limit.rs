//! Sliding-window rate limiting for external API families.
//!
//! One bucket per API family ("drive", "mail", ...); every outbound call
//! acquires from its bucket before hitting the wire. Callers suspend while
//! the window is full; admission is fair-enough FIFO, not strict.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cooperative admission gate for outbound calls.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Suspend until the caller may proceed.
    async fn acquire(&self);
}

/// Admits at most `max_per_window` operations per sliding window.
pub struct InMemoryRateLimiter {
    max_per_window: usize,
    window: Duration,
    check_interval: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl InMemoryRateLimiter {
    /// A limiter admitting `max_per_second` operations per sliding second.
    #[must_use]
    pub fn per_second(max_per_second: usize) -> Self {
        Self::new(max_per_second, Duration::from_secs(1))
    }

    #[must_use]
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            check_interval: Duration::from_millis(20),
            admissions: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut admissions = self.admissions.lock().await;
                let now = Instant::now();
                while let Some(front) = admissions.front() {
                    if now.duration_since(*front) >= self.window {
                        admissions.pop_front();
                    } else {
                        break;
                    }
                }
                if admissions.len() < self.max_per_window {
                    admissions.push_back(now);
                    return;
                }
                // Oldest admission ages out first; sleep until then.
                admissions
                    .front()
                    .map(|front| self.window.saturating_sub(now.duration_since(*front)))
                    .unwrap_or(self.check_interval)
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1)).min(self.check_interval)).await;
        }
    }
}

/// Process-wide registry of per-API-family buckets.
#[derive(Default)]
pub struct RateLimiterRegistry {
    buckets: DashMap<String, Arc<InMemoryRateLimiter>>,
}

impl RateLimiterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bucket for `name`, created with `max_per_second` on first use.
    pub fn bucket(&self, name: &str, max_per_second: usize) -> Arc<dyn RateLimiter> {
        self.buckets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryRateLimiter::per_second(max_per_second)))
            .clone()
    }
}
