use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::models::config::RetryConfig;
use crate::models::error::RecorderError;

use super::breaker::CircuitBreaker;

/// Exponential backoff schedule with symmetric jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// `base * 2^attempt`, capped at the max delay. `attempt` is 0-indexed.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(30);
        let delay = self.config.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.config.max_delay_ms))
    }

    /// Delay for `attempt` with jitter `sample` in `[-1, 1]` scaled by the
    /// configured jitter fraction. Never exceeds the max delay.
    pub fn jittered_delay(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let factor = 1.0 + sample.clamp(-1.0, 1.0) * self.config.jitter;
        let millis = (base * factor).max(0.0) as u64;
        Duration::from_millis(millis.min(self.config.max_delay_ms))
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.jittered_delay(attempt, sample)
    }
}

/// Run `op` until it succeeds, fails terminally, or attempts run out.
///
/// Before every attempt the breaker is consulted: if it is open the call
/// returns the last error seen, or `BreakerOpen` when nothing was attempted.
/// Retryable failures and successes are recorded in the breaker; terminal
/// errors are returned as-is without touching it. Cancellation interrupts
/// both the operation and the backoff sleep.
pub async fn retry_with_backoff<T, F, Fut>(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RecorderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RecorderError>>,
{
    let mut last_error: Option<RecorderError> = None;

    for attempt in 0..policy.max_attempts() {
        if cancel.is_cancelled() {
            return Err(RecorderError::Cancelled);
        }
        if !breaker.is_healthy() {
            log::debug!("circuit {} open, skipping attempt {}", breaker.name(), attempt + 1);
            return Err(last_error.unwrap_or(RecorderError::BreakerOpen));
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RecorderError::Cancelled),
            result = op() => result,
        };

        match result {
            Ok(value) => {
                breaker.record_success();
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                breaker.record_failure();
                log::warn!(
                    "attempt {}/{} against {} failed: {}",
                    attempt + 1,
                    policy.max_attempts(),
                    breaker.name(),
                    e
                );
                last_error = Some(e);
            }
        }

        if attempt + 1 < policy.max_attempts() {
            let delay = policy.next_delay(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RecorderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    Err(last_error.unwrap_or(RecorderError::BreakerOpen))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::BreakerConfig;
    use crate::models::state::BreakerState;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter: 0.25,
        })
    }

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "relay",
            BreakerConfig {
                failure_threshold: threshold,
                max_failures: threshold.max(10),
                recovery_timeout_ms: 60_000,
            },
        )
    }

    #[test]
    fn delays_double_and_cap() {
        let p = policy(5);
        assert_eq!(p.base_delay(0), Duration::from_millis(10));
        assert_eq!(p.base_delay(1), Duration::from_millis(20));
        assert_eq!(p.base_delay(3), Duration::from_millis(80));
        assert_eq!(p.base_delay(4), Duration::from_millis(100));
        assert_eq!(p.base_delay(40), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_quarter_and_cap() {
        let p = policy(5);
        assert_eq!(p.jittered_delay(2, -1.0), Duration::from_millis(30));
        assert_eq!(p.jittered_delay(2, 1.0), Duration::from_millis(50));
        assert_eq!(p.jittered_delay(4, 1.0), Duration::from_millis(100));
        for attempt in 0..6 {
            let delay = p.next_delay(attempt);
            let base = p.base_delay(attempt).as_millis() as f64;
            assert!(delay.as_millis() as f64 >= base * 0.75 - 1.0);
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let b = breaker(10);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let result = retry_with_backoff(&b, &policy(5), &cancel, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RecorderError::relay("unreachable"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(b.status().recoveries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let b = breaker(10);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry_with_backoff(&b, &policy(5), &cancel, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RecorderError::Relay {
                status: Some(404),
                message: "no such path".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(RecorderError::Relay { status: Some(404), .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.status().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_short_circuits_before_first_attempt() {
        let b = breaker(1);
        b.record_failure();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry_with_backoff(&b, &policy(5), &cancel, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert_eq!(result.unwrap_err(), RecorderError::BreakerOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opening_mid_retry_returns_last_error() {
        let b = breaker(2);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry_with_backoff(&b, &policy(5), &cancel, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RecorderError::relay("503"))
        })
        .await;

        assert_eq!(result.unwrap_err(), RecorderError::relay("503"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_returns_last_error() {
        let b = breaker(10);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry_with_backoff(&b, &policy(3), &cancel, || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(RecorderError::relay(format!("failure {n}")))
        })
        .await;

        assert_eq!(result.unwrap_err(), RecorderError::relay("failure 2"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff_sleep() {
        let b = breaker(10);
        let cancel = CancellationToken::new();
        let slow = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
            jitter: 0.0,
        });

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let started = std::time::Instant::now();
        let result: Result<(), _> =
            retry_with_backoff(&b, &slow, &cancel, || async move { Err(RecorderError::relay("down")) }).await;

        assert_eq!(result.unwrap_err(), RecorderError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn shared_breaker_sees_failures_from_concurrent_callers() {
        let b = Arc::new(breaker(4));
        let cancel = CancellationToken::new();
        let p = policy(2);

        let runs = (0..2).map(|_| {
            let b = Arc::clone(&b);
            let cancel = cancel.clone();
            let p = p.clone();
            tokio::spawn(async move {
                retry_with_backoff(&b, &p, &cancel, || async move {
                    Err::<(), _>(RecorderError::relay("down"))
                })
                .await
            })
        });
        for run in futures::future::join_all(runs).await {
            assert!(run.unwrap().is_err());
        }

        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.status().failure_count, 4);
    }
}
