//! Retry policy and loop.
//!
//! The policy is a pure `attempt -> delay` function so it can be tested
//! without sleeping; the loop is explicit control flow, generic over
//! the operation so it can be exercised with closures instead of real
//! network calls.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{ExecutorError, ExecutorResult};

/// Capped exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (total attempts = max_retries + 1).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter fraction in `0.0..=1.0`; each delay is scaled by a random
    /// factor in `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay before retry number `attempt` (0-based):
    /// `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(31)));
        exp.min(self.max_delay)
    }

    /// `delay_for` with jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        base.mul_f64(factor.max(0.0))
    }
}

/// Run `op` under the policy, retrying transient failures.
///
/// `op` receives the 0-based attempt number. Non-retryable errors
/// ([`ExecutorError::Validation`]) and retry exhaustion return the last
/// observed error.
pub async fn retry_with<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> ExecutorResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ExecutorResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.jittered_delay(attempt);
                debug!(attempt, ?delay, error = %e, "executor call failed, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: 0.0,
        }
    }

    #[test]
    fn delays_double_then_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn delays_are_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut last = Duration::ZERO;
        for attempt in 0..16 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= last, "delay for attempt {attempt} decreased");
            last = delay;
        }
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
        };
        for _ in 0..100 {
            let d = policy.jittered_delay(1); // nominal 200ms
            assert!(d >= Duration::from_millis(160), "jittered too low: {d:?}");
            assert!(d <= Duration::from_millis(240), "jittered too high: {d:?}");
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = retry_with(&fast_policy(3), move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ExecutorError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exactly_max_retries_then_fails() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: ExecutorResult<()> = retry_with(&fast_policy(3), move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExecutorError::Connection("refused".to_string()))
            }
        })
        .await;

        // Initial attempt + 3 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(result, Err(ExecutorError::Connection(_))));
    }

    #[tokio::test]
    async fn recovers_midway() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = retry_with(&fast_policy(5), move |attempt| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(ExecutorError::Unavailable("503".to_string()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_error_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: ExecutorResult<()> = retry_with(&fast_policy(5), move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExecutorError::Validation("unsupported language".to_string()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ExecutorError::Validation(_))));
    }

    #[tokio::test]
    async fn last_error_is_surfaced() {
        let result: ExecutorResult<()> = retry_with(&fast_policy(2), move |attempt| async move {
            if attempt < 2 {
                Err(ExecutorError::Connection("refused".to_string()))
            } else {
                Err(ExecutorError::Unavailable("503 on final attempt".to_string()))
            }
        })
        .await;

        match result {
            Err(ExecutorError::Unavailable(msg)) => assert!(msg.contains("final attempt")),
            other => panic!("expected the last error, got {other:?}"),
        }
    }
}
