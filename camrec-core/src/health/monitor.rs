use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::models::config::HealthConfig;
use crate::models::error::RecorderError;
use crate::traits::health_probe::HealthProbe;

use super::breaker::CircuitBreaker;

/// Result of one health-loop tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Breaker open and still inside its recovery timeout.
    Skipped,
    Healthy,
    Unhealthy(RecorderError),
}

/// Polls the relay probe on a fixed interval and feeds the breaker.
pub struct HealthMonitor {
    breaker: Arc<CircuitBreaker>,
    probe: Arc<dyn HealthProbe>,
    config: HealthConfig,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(breaker: Arc<CircuitBreaker>, probe: Arc<dyn HealthProbe>, config: HealthConfig) -> Self {
        Self {
            breaker,
            probe,
            config,
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Start the polling loop under `parent`. A second call is a no-op.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let cancel = parent.child_token();
        *self.cancel.lock() = Some(cancel.clone());

        let monitor = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.check_once().await;
                    }
                }
            }
            log::debug!("health loop for {} stopped", monitor.breaker.name());
        }));
    }

    pub fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// One probe cycle. While the breaker is open and its recovery timeout
    /// has not elapsed nothing is probed; once it has, the breaker moves to
    /// `HalfOpen` before the probe runs.
    pub async fn check_once(&self) -> ProbeOutcome {
        if !self.breaker.try_half_open() {
            return ProbeOutcome::Skipped;
        }

        let timeout = self.config.probe_timeout();
        let result = match tokio::time::timeout(timeout, self.probe.check()).await {
            Ok(result) => result,
            Err(_) => Err(RecorderError::ProbeTimeout(timeout)),
        };

        match result {
            Ok(()) => {
                self.breaker.record_success();
                ProbeOutcome::Healthy
            }
            Err(e) => {
                log::warn!("health probe for {} failed: {}", self.breaker.name(), e);
                self.breaker.record_failure();
                ProbeOutcome::Unhealthy(e)
            }
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("breaker", &self.breaker)
            .field("running", &self.is_running())
            .finish()
    }
}
