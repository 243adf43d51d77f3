//! Exponential backoff with full jitter

use crate::connector::ConnectorError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry schedule for transient provider failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            factor: 2,
            cap: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Deterministic upper bound for the given attempt (1-based)
    pub fn max_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self
            .base
            .saturating_mul(self.factor.saturating_pow(exponent));
        scaled.min(self.cap)
    }

    /// Full jitter: uniform in [0, max_delay(attempt)]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let cap_ms = u64::try_from(self.max_delay(attempt).as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=cap_ms))
    }
}

/// Run an operation under the policy, retrying transient failures
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> std::result::Result<T, ConnectorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, ConnectorError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.jittered_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying model call");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_exponentially_to_the_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_delay(1), Duration::from_millis(200));
        assert_eq!(policy.max_delay(2), Duration::from_millis(400));
        assert_eq!(policy.max_delay(3), Duration::from_millis(800));
        // Far attempts saturate at the cap
        assert_eq!(policy.max_delay(10), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            for _ in 0..50 {
                assert!(policy.jittered_delay(attempt) <= policy.max_delay(attempt));
            }
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let policy = RetryPolicy {
            base: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(4),
            max_attempts: 5,
        };
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, |_| {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(ConnectorError::Transport("reset".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result: std::result::Result<(), _> = retry_with_backoff(&policy, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ConnectorError::BadRequest("no".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(ConnectorError::BadRequest(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let policy = RetryPolicy {
            base: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(2),
            max_attempts: 5,
        };
        let attempts = AtomicU32::new(0);
        let result: std::result::Result<(), _> = retry_with_backoff(&policy, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ConnectorError::RateLimited) }
        })
        .await;
        assert!(matches!(result, Err(ConnectorError::RateLimited)));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }
}
