use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::health::{retry_with_backoff, CircuitBreaker, HealthMonitor, ProbeOutcome, RetryPolicy};
use crate::models::config::RecorderConfig;
use crate::models::error::RecorderError;
use crate::models::process::ProcessInfo;
use crate::models::segment::{ContinuityReport, Segment};
use crate::models::session::{SessionSummary, StartOptions};
use crate::models::stats::{BreakerStatus, ResourceStats};
use crate::models::storage::StorageSnapshot;
use crate::session::SessionManager;
use crate::storage::StorageMonitor;
use crate::supervisor::ProcessSupervisor;
use crate::traits::command_builder::CommandBuilder;
use crate::traits::delegate::RecorderDelegate;
use crate::traits::disk_probe::DiskUsageProbe;
use crate::traits::health_probe::HealthProbe;
use crate::traits::process_spawner::ProcessSpawner;

/// Platform backends and callbacks the engine is assembled from.
pub struct Collaborators {
    pub spawner: Arc<dyn ProcessSpawner>,
    pub disk_probe: Arc<dyn DiskUsageProbe>,
    pub health_probe: Arc<dyn HealthProbe>,
    pub command_builder: Arc<dyn CommandBuilder>,
    pub delegate: Option<Arc<dyn RecorderDelegate>>,
}

/// Recording session and resilience engine.
///
/// Construction only allocates. `start` launches the storage and health
/// loops under one root cancellation token; `shutdown` stops every session,
/// reaps every encoder and cancels every loop, including backoff sleeps of
/// in-flight `retry_with_backoff` calls.
pub struct RecordingEngine {
    config: RecorderConfig,
    supervisor: Arc<ProcessSupervisor>,
    storage: Arc<StorageMonitor>,
    breaker: Arc<CircuitBreaker>,
    health: Arc<HealthMonitor>,
    sessions: SessionManager,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl RecordingEngine {
    pub fn new(config: RecorderConfig, collaborators: Collaborators) -> Result<Self, RecorderError> {
        config.validate()?;
        let Collaborators {
            spawner,
            disk_probe,
            health_probe,
            command_builder,
            delegate,
        } = collaborators;

        let supervisor = Arc::new(ProcessSupervisor::new(spawner, config.supervisor.grace_period()));

        let mut storage = StorageMonitor::new(config.storage.clone(), disk_probe);
        let mut breaker = CircuitBreaker::new("relay", config.breaker.clone());
        if let Some(delegate) = &delegate {
            storage = storage.with_delegate(Arc::clone(delegate));
            breaker = breaker.with_delegate(Arc::clone(delegate));
        }
        let storage = Arc::new(storage);
        let breaker = Arc::new(breaker);

        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&breaker),
            health_probe,
            config.health.clone(),
        ));
        let sessions = SessionManager::new(
            config.session.clone(),
            config.supervisor.grace_period(),
            Arc::clone(&supervisor),
            Arc::clone(&storage),
            command_builder,
            delegate,
        );
        let retry = RetryPolicy::new(config.retry.clone());

        Ok(Self {
            config,
            supervisor,
            storage,
            breaker,
            health,
            sessions,
            retry,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Start background loops. Takes an initial storage sample first so the
    /// admission gate is meaningful from the first session.
    pub fn start(&self) {
        if self.cancel.is_cancelled() {
            log::warn!("engine already shut down, not starting");
            return;
        }
        self.supervisor.start(&self.cancel);
        self.sessions.start(&self.cancel);

        if let Err(e) = self.storage.refresh() {
            log::warn!("initial storage sample failed: {}", e);
        }
        self.storage.start(&self.cancel);
        self.health.start(&self.cancel);
        log::info!(
            "recording engine started (output {}, watching {})",
            self.config.session.output_root.display(),
            self.config.storage.watch_path.display()
        );
    }

    pub async fn shutdown(&self) {
        log::info!("recording engine shutting down");
        self.sessions.shutdown().await;
        self.storage.stop();
        self.health.stop();
        self.supervisor.shutdown(self.config.supervisor.grace_period()).await;
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn start_session(
        &self,
        source_id: &str,
        options: StartOptions,
    ) -> Result<ContinuityReport, RecorderError> {
        if self.cancel.is_cancelled() {
            return Err(RecorderError::Cancelled);
        }
        self.sessions.start_session(source_id, options).await
    }

    pub async fn stop_session(&self, source_id: &str) -> Result<ContinuityReport, RecorderError> {
        self.sessions.stop_session(source_id).await
    }

    pub async fn rotate_segment(&self, session_id: Uuid) -> Result<Segment, RecorderError> {
        self.sessions.rotate_segment(session_id).await
    }

    pub fn continuity(&self, session_id: Uuid) -> Result<ContinuityReport, RecorderError> {
        self.sessions.continuity(session_id)
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.list_sessions()
    }

    pub fn session_for_source(&self, source_id: &str) -> Option<SessionSummary> {
        self.sessions.session_for_source(source_id)
    }

    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.supervisor.list()
    }

    pub fn storage_snapshot(&self) -> Option<StorageSnapshot> {
        self.storage.snapshot()
    }

    pub fn check_availability(&self) -> Result<(), RecorderError> {
        self.storage.check_availability()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    /// Run one relay health probe outside the polling schedule.
    pub async fn check_relay_health(&self) -> ProbeOutcome {
        self.health.check_once().await
    }

    pub fn stats(&self) -> ResourceStats {
        self.sessions.stats()
    }

    /// Retry a relay-facing operation under the engine's breaker and policy.
    /// Returns `Cancelled` promptly once the engine shuts down.
    pub async fn retry_with_backoff<T, F, Fut>(&self, op: F) -> Result<T, RecorderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RecorderError>>,
    {
        retry_with_backoff(&self.breaker, &self.retry, &self.cancel, op).await
    }
}

impl std::fmt::Debug for RecordingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingEngine")
            .field("sessions", &self.sessions)
            .field("supervisor", &self.supervisor)
            .field("breaker", &self.breaker)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
