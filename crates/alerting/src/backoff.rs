//! Timeout and retry with exponential backoff

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy for outbound calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Bound on a single attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry
    pub backoff_base: Duration,
    /// Upper bound on a single delay
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }
}

/// All attempts failed
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// Every attempt is bounded by `policy.timeout`; a timed-out attempt maps to
/// the error produced by `on_timeout`.
pub async fn retry_with_timeout<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
    on_timeout: impl Fn(Duration) -> E,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => on_timeout(policy.timeout),
        };

        if attempt >= policy.max_attempts() {
            return Err(RetryExhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        let delay = policy.backoff(attempt);
        debug!("Attempt {} failed ({}), retrying in {:?}", attempt, error, delay);
        tokio::time::sleep(delay).await;
    }
}
