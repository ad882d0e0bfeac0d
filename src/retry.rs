//! Hand-rolled exponential backoff for a single provider attempt.
//!
//! This is deliberately not `with_retry`-over-all-providers: the router
//! already fans a request out across providers (§4.4); this module only
//! governs whether a *single* provider call gets a second try before the
//! router moves on to the next candidate.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::Error;

/// Exponential backoff policy for a single provider attempt
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Delay ceiling
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after each attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled_nanos = (current.as_nanos() as f64 * self.multiplier) as u64;
        Duration::from_nanos(scaled_nanos).min(self.max_backoff)
    }
}

/// Execute `f` under `policy`, retrying only [`Error::is_retryable_provider_failure`] errors.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted or a non-retryable error occurs.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, name: &str, mut f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut delay = policy.initial_backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retryable_provider_failure() || attempt >= policy.max_attempts {
                    return Err(e);
                }
                debug!(
                    operation = name,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "retrying after backoff"
                );
                sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let policy = RetryPolicy::default();
        let result: Result<u32, Error> = with_retry(&policy, "test", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_retryable_errors_up_to_max_attempts() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, Error> = with_retry(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Transport("timeout".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), policy.max_attempts);
    }

    #[tokio::test]
    async fn never_retries_non_retryable_errors() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, Error> = with_retry(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Client("bad params".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
