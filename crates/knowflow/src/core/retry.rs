//! Retry policies for calls against external services.
//!
//! Only errors classified retryable by [`Error::is_retryable`] are retried;
//! everything else surfaces immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::core::error::{Error, Result};

/// How to retry a failing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Fail on the first error.
    None,
    /// Retry `attempts` times with a fixed delay between attempts.
    Fixed { attempts: u32, delay: Duration },
    /// Retry `attempts` times, doubling the delay each time up to `max_delay`.
    Exponential {
        attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    },
}

impl RetryPolicy {
    /// Exponential backoff with sensible defaults (500ms base, 30s cap).
    #[must_use]
    pub fn exponential(attempts: u32) -> Self {
        RetryPolicy::Exponential {
            attempts,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Fixed-delay retries.
    #[must_use]
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { attempts, delay }
    }

    /// Delay before retry number `attempt` (zero-based), or `None` when the
    /// budget is exhausted.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { attempts, delay } => (attempt < *attempts).then_some(*delay),
            RetryPolicy::Exponential {
                attempts,
                base_delay,
                max_delay,
            } => {
                if attempt >= *attempts {
                    return None;
                }
                let factor = 2u32.saturating_pow(attempt);
                Some((*base_delay).saturating_mul(factor).min(*max_delay))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::exponential(3)
    }
}

/// Run `op`, retrying retryable errors according to `policy`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => match policy.delay_for(attempt) {
                Some(delay) => {
                    warn!(attempt, ?delay, error = %err, "retrying after failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

/// Like [`with_retry`], but a retryable error that survives all attempts is
/// converted through `terminal` (e.g. into [`Error::Messaging`]).
pub async fn with_retry_or<T, F, Fut>(
    policy: &RetryPolicy,
    terminal: fn(String) -> Error,
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match with_retry(policy, op).await {
        Err(err) if err.is_retryable() => Err(terminal(err.to_string())),
        other => other,
    }
}
