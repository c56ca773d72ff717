use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::config::BreakerConfig;
use crate::models::state::BreakerState;
use crate::models::stats::BreakerStatus;
use crate::traits::delegate::RecorderDelegate;

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    activations: u64,
    recoveries: u64,
}

/// Circuit breaker guarding relay-dependent operations.
///
/// All counters and the state live under one lock so every decision sees a
/// consistent snapshot. Recording outcomes never fails. Transitions are
/// logged and forwarded to the delegate after the lock is released.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    delegate: Option<Arc<dyn RecorderDelegate>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                consecutive_failures: 0,
                last_failure: None,
                last_failure_at: None,
                last_success_at: None,
                activations: 0,
                recoveries: 0,
            }),
            delegate: None,
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn RecorderDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Operations are attempted while `Closed` or `HalfOpen`.
    pub fn is_healthy(&self) -> bool {
        self.state().allows_requests()
    }

    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.last_success_at = Some(Utc::now());
            if inner.state == BreakerState::Open {
                // Only a probe after the recovery timeout can close it.
                None
            } else {
                if inner.consecutive_failures > 0 {
                    inner.recoveries += 1;
                }
                inner.failure_count = 0;
                inner.consecutive_failures = 0;
                if inner.state == BreakerState::HalfOpen {
                    inner.state = BreakerState::Closed;
                    Some((BreakerState::HalfOpen, BreakerState::Closed))
                } else {
                    None
                }
            }
        };
        self.notify(transition);
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub(crate) fn record_failure_at(&self, now: Instant) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            inner.last_failure = Some(now);
            inner.last_failure_at = Some(Utc::now());

            let from = inner.state;
            let trips = match from {
                BreakerState::Closed => inner.failure_count >= self.config.failure_threshold,
                BreakerState::HalfOpen => true,
                BreakerState::Open => false,
            } || (from != BreakerState::Open && inner.failure_count >= self.config.max_failures);

            if trips {
                inner.state = BreakerState::Open;
                inner.activations += 1;
                Some((from, BreakerState::Open))
            } else {
                None
            }
        };
        self.notify(transition);
    }

    /// Move `Open` to `HalfOpen` once the recovery timeout has elapsed since
    /// the last failure. Returns whether a probe should run now.
    pub fn try_half_open(&self) -> bool {
        self.try_half_open_at(Instant::now())
    }

    pub(crate) fn try_half_open_at(&self, now: Instant) -> bool {
        let (allowed, transition) = {
            let mut inner = self.inner.lock();
            match inner.state {
                BreakerState::Closed | BreakerState::HalfOpen => (true, None),
                BreakerState::Open => {
                    let elapsed = inner
                        .last_failure
                        .map_or(true, |at| now.saturating_duration_since(at) >= self.config.recovery_timeout());
                    if elapsed {
                        inner.state = BreakerState::HalfOpen;
                        (true, Some((BreakerState::Open, BreakerState::HalfOpen)))
                    } else {
                        (false, None)
                    }
                }
            }
        };
        self.notify(transition);
        allowed
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            max_failures: self.config.max_failures,
            activations: inner.activations,
            recoveries: inner.recoveries,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
        }
    }

    fn notify(&self, transition: Option<(BreakerState, BreakerState)>) {
        let Some((from, to)) = transition else {
            return;
        };
        match to {
            BreakerState::Open => log::warn!("circuit {} opened (was {:?})", self.name, from),
            BreakerState::HalfOpen => log::info!("circuit {} half-open, probing", self.name),
            BreakerState::Closed => log::info!("circuit {} closed", self.name),
        }
        if let Some(delegate) = &self.delegate {
            delegate.on_breaker_state_changed(from, to);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(threshold: u32, max: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "relay",
            BreakerConfig {
                failure_threshold: threshold,
                max_failures: max,
                recovery_timeout_ms: 1_000,
            },
        )
    }

    #[test]
    fn two_failures_open_at_threshold_two() {
        let b = breaker(2, 10);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.is_healthy());
        assert_eq!(b.status().activations, 1);
    }

    #[test]
    fn success_while_open_has_no_effect() {
        let b = breaker(2, 10);
        b.record_failure();
        b.record_failure();

        b.record_success();

        let status = b.status();
        assert_eq!(status.state, BreakerState::Open);
        assert_eq!(status.failure_count, 2);
        assert_eq!(status.recoveries, 0);
        assert!(status.last_success_at.is_some());
    }

    #[test]
    fn half_open_only_after_recovery_timeout() {
        let b = breaker(1, 10);
        let t0 = Instant::now();
        b.record_failure_at(t0);

        assert!(!b.try_half_open_at(t0 + Duration::from_millis(500)));
        assert_eq!(b.state(), BreakerState::Open);

        assert!(b.try_half_open_at(t0 + Duration::from_millis(1_000)));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.is_healthy());
    }

    #[test]
    fn half_open_closes_on_success() {
        let b = breaker(1, 10);
        let t0 = Instant::now();
        b.record_failure_at(t0);
        b.try_half_open_at(t0 + Duration::from_secs(2));

        b.record_success();

        let status = b.status();
        assert_eq!(status.state, BreakerState::Closed);
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.recoveries, 1);
    }

    #[test]
    fn half_open_reopens_on_failure() {
        let b = breaker(3, 10);
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0);
        }
        b.try_half_open_at(t0 + Duration::from_secs(2));

        b.record_failure_at(t0 + Duration::from_secs(2));

        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.status().activations, 2);
        assert!(!b.try_half_open_at(t0 + Duration::from_millis(2_500)));
    }

    #[test]
    fn success_resets_failure_streak_while_closed() {
        let b = breaker(3, 10);
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();

        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.status().recoveries, 1);
    }

    #[test]
    fn max_failures_forces_open() {
        let b = breaker(5, 5);
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.status().activations, 1);
    }

    #[test]
    fn delegate_sees_transitions() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<(BreakerState, BreakerState)>>);
        impl RecorderDelegate for Recorder {
            fn on_breaker_state_changed(&self, from: BreakerState, to: BreakerState) {
                self.0.lock().push((from, to));
            }
        }

        let recorder = Arc::new(Recorder::default());
        let b = breaker(1, 10).with_delegate(recorder.clone());
        let t0 = Instant::now();
        b.record_failure_at(t0);
        b.try_half_open_at(t0 + Duration::from_secs(5));
        b.record_success();

        assert_eq!(
            *recorder.0.lock(),
            vec![
                (BreakerState::Closed, BreakerState::Open),
                (BreakerState::Open, BreakerState::HalfOpen),
                (BreakerState::HalfOpen, BreakerState::Closed),
            ]
        );
    }
}
