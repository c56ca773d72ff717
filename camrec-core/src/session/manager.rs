use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::config::SessionConfig;
use crate::models::error::RecorderError;
use crate::models::process::ProcessId;
use crate::models::segment::{ContinuityReport, Segment};
use crate::models::session::{RecordingSession, SessionSummary, StartOptions};
use crate::models::state::SessionState;
use crate::models::stats::ResourceStats;
use crate::registry::Registry;
use crate::storage::{write_manifest, StorageMonitor};
use crate::supervisor::ProcessSupervisor;
use crate::traits::command_builder::CommandBuilder;
use crate::traits::delegate::RecorderDelegate;

use super::rotation::{self, rotation_due, RotationReason, SegmentLimits};
use super::segments::{SegmentTracker, TrackerError};

/// Session bookkeeping guarded by the per-session lock.
struct SessionRecord {
    session: RecordingSession,
    tracker: SegmentTracker,
}

impl SessionRecord {
    fn report(&self) -> ContinuityReport {
        ContinuityReport {
            session_id: self.session.id,
            source_id: self.session.source_id.clone(),
            continuity_id: self.session.continuity_id,
            state: self.session.state,
            started_at: self.session.started_at,
            ended_at: self.session.ended_at,
            segment_count: self.tracker.len(),
            segments_opened: self.tracker.opened(),
            elapsed_secs: self.session.duration_at(Utc::now()).as_secs_f64(),
            segments: self.tracker.segments(),
        }
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session.id,
            source_id: self.session.source_id.clone(),
            continuity_id: self.session.continuity_id,
            state: self.session.state,
            started_at: self.session.started_at,
            active_segment_index: self.tracker.active().map(|s| s.index),
            segment_count: self.tracker.len(),
        }
    }
}

pub(crate) struct SessionEntry {
    pub(super) session_id: Uuid,
    pub(super) source_id: String,
    directory: PathBuf,
    options: StartOptions,
    limits: SegmentLimits,
    record: Mutex<SessionRecord>,
    /// Serializes rotate and stop for this session only.
    op_lock: tokio::sync::Mutex<()>,
    rotation_cancel: CancellationToken,
}

impl SessionEntry {
    fn state(&self) -> SessionState {
        self.record.lock().session.state
    }

    fn report(&self) -> ContinuityReport {
        self.record.lock().report()
    }

    fn summary(&self) -> SessionSummary {
        self.record.lock().summary()
    }
}

/// Session table slot. `Reserved` holds a source while its first encoder
/// launches, so concurrent starts for one source cannot both launch.
#[derive(Clone)]
enum SessionSlot {
    Reserved,
    Live(Arc<SessionEntry>),
}

impl SessionSlot {
    fn live(self) -> Option<Arc<SessionEntry>> {
        match self {
            Self::Live(entry) => Some(entry),
            Self::Reserved => None,
        }
    }
}

/// Releases a reserved slot unless the session was committed, including
/// when the starting future is dropped mid-launch.
struct Reservation<'a> {
    sessions: &'a Registry<String, SessionSlot>,
    source_id: String,
    armed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, entry: Arc<SessionEntry>) {
        self.sessions.insert(self.source_id.clone(), SessionSlot::Live(entry));
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.sessions.remove(&self.source_id);
        }
    }
}

#[derive(Default)]
struct Counters {
    starts: AtomicU64,
    stops: AtomicU64,
    rotations: AtomicU64,
    errors: AtomicU64,
}

pub(crate) struct ManagerInner {
    config: SessionConfig,
    grace: Duration,
    supervisor: Arc<ProcessSupervisor>,
    storage: Arc<StorageMonitor>,
    builder: Arc<dyn CommandBuilder>,
    delegate: Option<Arc<dyn RecorderDelegate>>,
    sessions: Registry<String, SessionSlot>,
    counters: Counters,
    cancel: Mutex<CancellationToken>,
}

/// Continuity-aware recording session manager.
///
/// One session per source. Each session owns an ordered list of segments
/// sharing its continuity ID, a rotation loop, and at most one live encoder.
/// Operations on different sessions never contend beyond the brief table
/// lookup.
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        grace: Duration,
        supervisor: Arc<ProcessSupervisor>,
        storage: Arc<StorageMonitor>,
        builder: Arc<dyn CommandBuilder>,
        delegate: Option<Arc<dyn RecorderDelegate>>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                grace,
                supervisor,
                storage,
                builder,
                delegate,
                sessions: Registry::new(),
                counters: Counters::default(),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Tie rotation loops to `parent`.
    pub fn start(&self, parent: &CancellationToken) {
        *self.inner.cancel.lock() = parent.child_token();
    }

    /// Begin recording `source_id` into segment 0 of a new continuity.
    pub async fn start_session(
        &self,
        source_id: &str,
        options: StartOptions,
    ) -> Result<ContinuityReport, RecorderError> {
        self.inner.start_session(source_id, options).await
    }

    /// Stop the session for `source_id`, finalizing its active segment.
    pub async fn stop_session(&self, source_id: &str) -> Result<ContinuityReport, RecorderError> {
        let entry = self
            .inner
            .live_entry(source_id)
            .ok_or_else(|| RecorderError::SessionNotFound(source_id.to_string()))?;
        self.inner.stop_entry(&entry).await
    }

    /// Close the active segment and continue in the next one.
    pub async fn rotate_segment(&self, session_id: Uuid) -> Result<Segment, RecorderError> {
        let entry = self
            .inner
            .entry_by_session(session_id)
            .ok_or_else(|| RecorderError::SessionNotFound(session_id.to_string()))?;
        let _op = entry.op_lock.lock().await;
        self.inner.rotate_locked(&entry, RotationReason::Manual).await
    }

    pub fn continuity(&self, session_id: Uuid) -> Result<ContinuityReport, RecorderError> {
        self.inner
            .entry_by_session(session_id)
            .map(|entry| entry.report())
            .ok_or_else(|| RecorderError::SessionNotFound(session_id.to_string()))
    }

    /// Active sessions, oldest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .inner
            .live_entries()
            .iter()
            .map(|entry| entry.summary())
            .collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }

    pub fn session_for_source(&self, source_id: &str) -> Option<SessionSummary> {
        self.inner
            .live_entry(source_id)
            .map(|entry| entry.summary())
    }

    pub fn active_count(&self) -> usize {
        self.inner.live_entries().len()
    }

    pub fn stats(&self) -> ResourceStats {
        let counters = &self.inner.counters;
        ResourceStats {
            active_processes: self.inner.supervisor.active_count(),
            active_sessions: self.active_count(),
            total_starts: counters.starts.load(Ordering::Relaxed),
            total_stops: counters.stops.load(Ordering::Relaxed),
            total_rotations: counters.rotations.load(Ordering::Relaxed),
            total_errors: counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Stop every session concurrently, then cancel the rotation root.
    pub async fn shutdown(&self) {
        let entries = self.inner.live_entries();
        let stops = entries.iter().map(|entry| self.inner.stop_entry(entry));
        for result in join_all(stops).await {
            if let Err(e) = result {
                log::debug!("shutdown stop: {}", e);
            }
        }
        self.inner.cancel.lock().cancel();
    }
}

impl ManagerInner {
    async fn start_session(
        self: &Arc<Self>,
        source_id: &str,
        options: StartOptions,
    ) -> Result<ContinuityReport, RecorderError> {
        validate_source_id(source_id)?;
        let limits = SegmentLimits::resolve(&self.config, &options)?;

        let max_sessions = self.config.max_active_sessions;
        self.sessions.try_insert_with(
            source_id.to_string(),
            SessionSlot::Reserved,
            |_, active| {
                if active >= max_sessions {
                    Err(RecorderError::TooManySessions(max_sessions))
                } else {
                    Ok(())
                }
            },
            |_| RecorderError::AlreadyRecording(source_id.to_string()),
        )?;
        let reservation = Reservation {
            sessions: &self.sessions,
            source_id: source_id.to_string(),
            armed: true,
        };

        if let Err(e) = self.storage.check_availability() {
            return Err(self.fail(Some(source_id), admission_error(e)));
        }

        let mut session = RecordingSession::new(source_id);
        let directory = self
            .config
            .output_root
            .join(source_id)
            .join(session.continuity_id.to_string());
        let mut tracker = SegmentTracker::new(session.continuity_id, directory.clone(), &self.config.segment_extension);
        let path = tracker.next_path();
        tracker
            .open(path.clone(), session.started_at)
            .map_err(|e| tracker_error(e, source_id))?;

        let argv = self.builder.build_command(source_id, &path, &options);
        let encoder = match self.supervisor.launch(argv, &path).await {
            Ok(id) => id,
            Err(e) => return Err(self.fail(Some(source_id), e)),
        };
        session.encoder = Some(encoder);

        let entry = Arc::new(SessionEntry {
            session_id: session.id,
            source_id: source_id.to_string(),
            directory,
            options,
            limits,
            record: Mutex::new(SessionRecord { session, tracker }),
            op_lock: tokio::sync::Mutex::new(()),
            rotation_cancel: self.cancel.lock().child_token(),
        });
        let report = entry.record.lock().report();
        // Held until the first manifest is written so a racing stop persists last.
        let op = entry.op_lock.lock().await;
        reservation.commit(Arc::clone(&entry));
        self.storage.protect(&entry.directory);
        self.counters.starts.fetch_add(1, Ordering::Relaxed);

        log::info!(
            "session {} started for {} (continuity {}, encoder {})",
            report.session_id,
            source_id,
            report.continuity_id,
            encoder
        );
        self.notify(|d| d.on_session_state_changed(source_id, SessionState::Recording));
        self.persist(&entry.directory, &report).await;
        drop(op);

        tokio::spawn(rotation::run(
            Arc::downgrade(self),
            Arc::clone(&entry),
            self.config.rotation_poll_interval(),
            entry.rotation_cancel.clone(),
        ));
        Ok(report)
    }

    pub(super) async fn stop_entry(&self, entry: &Arc<SessionEntry>) -> Result<ContinuityReport, RecorderError> {
        {
            let mut record = entry.record.lock();
            if record.session.state != SessionState::Recording {
                return Err(RecorderError::SessionStopping(entry.source_id.clone()));
            }
            record.session.state = SessionState::Stopping;
        }
        self.notify(|d| d.on_session_state_changed(&entry.source_id, SessionState::Stopping));
        entry.rotation_cancel.cancel();

        // Waits out any rotation in flight; it sees Stopping and backs off.
        let _op = entry.op_lock.lock().await;
        let encoder = entry.record.lock().session.encoder.take();
        if let Some(id) = encoder {
            self.terminate_encoder(id).await;
        }
        Ok(self.finish(entry, None).await)
    }

    /// Rotate with the session's op lock already held.
    pub(super) async fn rotate_locked(
        &self,
        entry: &Arc<SessionEntry>,
        reason: RotationReason,
    ) -> Result<Segment, RecorderError> {
        let source_id = entry.source_id.as_str();
        let (active_path, last_size) = {
            let record = entry.record.lock();
            if record.session.state != SessionState::Recording {
                return Err(RecorderError::SessionStopping(source_id.to_string()));
            }
            let active = record
                .tracker
                .active()
                .ok_or_else(|| RecorderError::NoActiveSegment(entry.session_id.to_string()))?;
            (active.path.clone(), active.size_bytes)
        };

        if let Err(e) = self.storage.check_availability() {
            return Err(self.fail(Some(source_id), admission_error(e)));
        }

        let old_encoder = entry.record.lock().session.encoder.take();
        if let Some(id) = old_encoder {
            self.terminate_encoder(id).await;
        }
        let size = self.observed_size(&active_path, last_size).await;

        let next_path = {
            let record = entry.record.lock();
            if record.session.state != SessionState::Recording {
                // Stop arrived while the old encoder wound down; it finalizes.
                return Err(RecorderError::SessionStopping(source_id.to_string()));
            }
            record.tracker.next_path()
        };

        let argv = self.builder.build_command(source_id, &next_path, &entry.options);
        let new_encoder = match self.supervisor.launch(argv, &next_path).await {
            Ok(id) => id,
            Err(e) => {
                log::error!("relaunch for {} failed, stopping session: {}", source_id, e);
                let stopping = {
                    let mut record = entry.record.lock();
                    let was_recording = record.session.state == SessionState::Recording;
                    record.session.state = SessionState::Stopping;
                    was_recording
                };
                if stopping {
                    self.notify(|d| d.on_session_state_changed(source_id, SessionState::Stopping));
                }
                self.finish(entry, Some(size)).await;
                return Err(self.fail(Some(source_id), e));
            }
        };

        let rotated = {
            let mut record = entry.record.lock();
            if record.session.state != SessionState::Recording {
                None
            } else {
                Some(match record.tracker.rotate(next_path, Utc::now(), size) {
                    Ok((finished, started)) => {
                        record.session.encoder = Some(new_encoder);
                        let pruned = record.tracker.prune(entry.limits.max_segments);
                        Ok((finished, started, pruned, record.report()))
                    }
                    Err(e) => Err(tracker_error(e, source_id)),
                })
            }
        };
        let (finished, started, pruned, report) = match rotated {
            Some(Ok(rotated)) => rotated,
            Some(Err(e)) => {
                self.terminate_encoder(new_encoder).await;
                return Err(self.fail(Some(source_id), e));
            }
            None => {
                // Stop arrived during the relaunch; segment N stays the last one.
                log::info!("{} stopping, discarding relaunched encoder {}", source_id, new_encoder);
                self.terminate_encoder(new_encoder).await;
                return Err(RecorderError::SessionStopping(source_id.to_string()));
            }
        };

        for segment in &pruned {
            remove_segment_file(&segment.path).await;
        }
        self.counters.rotations.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "{} rotated segment {} -> {} ({}, {} bytes)",
            source_id,
            finished.index,
            started.index,
            reason,
            finished.size_bytes
        );
        self.notify(|d| d.on_segment_rotated(source_id, &finished, &started));
        if !pruned.is_empty() {
            log::info!("{} pruned {} segment(s) past retention", source_id, pruned.len());
            self.notify(|d| d.on_segments_pruned(source_id, &pruned));
        }
        self.persist(&entry.directory, &report).await;
        Ok(started)
    }

    /// One rotation-loop tick. Returns whether the loop should keep going.
    pub(super) async fn check_rotation(&self, entry: &Arc<SessionEntry>) -> bool {
        let Ok(op) = entry.op_lock.try_lock() else {
            // A rotation or stop is already running for this session.
            return entry.state() == SessionState::Recording;
        };

        let (encoder, path, started_at, last_size) = {
            let record = entry.record.lock();
            if record.session.state != SessionState::Recording {
                return false;
            }
            let Some(active) = record.tracker.active() else {
                return false;
            };
            (record.session.encoder, active.path.clone(), active.started_at, active.size_bytes)
        };

        let alive = encoder.is_some_and(|id| self.supervisor.is_alive(id));
        let size = self.observed_size(&path, last_size).await;
        entry.record.lock().tracker.update_active_size(size);
        let elapsed = (Utc::now() - started_at).to_std().unwrap_or_default();

        let Some(reason) = rotation_due(size, elapsed, &entry.limits, alive) else {
            return true;
        };

        if reason == RotationReason::EncoderExited {
            if !self.config.restart_on_encoder_exit {
                log::warn!("encoder for {} exited, stopping session", entry.source_id);
                drop(op);
                if let Err(e) = self.stop_entry(entry).await {
                    log::debug!("stop after encoder exit: {}", e);
                }
                return false;
            }
            log::warn!("encoder for {} exited, resuming in a new segment", entry.source_id);
        }

        match self.rotate_locked(entry, reason).await {
            Ok(_) => true,
            Err(RecorderError::SessionStopping(_)) => false,
            Err(e) => {
                log::warn!("scheduled rotation for {} failed: {}", entry.source_id, e);
                entry.state() == SessionState::Recording
            }
        }
    }

    /// Finalize the active segment, mark the session stopped and drop it from
    /// the table. Idempotent: an already stopped session is only reported.
    async fn finish(&self, entry: &SessionEntry, known_size: Option<u64>) -> ContinuityReport {
        let active = {
            let record = entry.record.lock();
            if record.session.state == SessionState::Stopped {
                return record.report();
            }
            record.tracker.active().map(|s| (s.path.clone(), s.size_bytes))
        };
        let size = match (known_size, active) {
            (Some(size), _) => size,
            (None, Some((path, last))) => self.observed_size(&path, last).await,
            (None, None) => 0,
        };

        let report = {
            let mut record = entry.record.lock();
            let now = Utc::now();
            if let Err(e) = record.tracker.finalize_active(now, size) {
                log::debug!("{} stopped without an open segment: {}", entry.source_id, e);
            }
            record.session.encoder = None;
            record.session.state = SessionState::Stopped;
            record.session.ended_at = Some(now);
            record.report()
        };

        entry.rotation_cancel.cancel();
        self.sessions.remove(&entry.source_id);
        self.storage.release(&entry.directory);
        self.counters.stops.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "session {} for {} stopped after {:.1}s ({} segments)",
            report.session_id,
            entry.source_id,
            report.elapsed_secs,
            report.segments_opened
        );
        self.notify(|d| d.on_session_state_changed(&entry.source_id, SessionState::Stopped));
        self.persist(&entry.directory, &report).await;
        report
    }

    async fn terminate_encoder(&self, id: ProcessId) {
        match self.supervisor.terminate(id, self.grace).await {
            Ok(()) | Err(RecorderError::ProcessNotFound(_)) => {}
            Err(e) => log::warn!("failed to stop encoder {}: {}", id, e),
        }
    }

    /// Current size of `path`, falling back to the last observation.
    async fn observed_size(&self, path: &Path, fallback: u64) -> u64 {
        match self.supervisor.file_info(path).await {
            Ok(info) => info.size_bytes,
            Err(RecorderError::FileNotFound(_)) => fallback,
            Err(e) => {
                log::warn!("{}", e);
                fallback
            }
        }
    }

    fn live_entry(&self, source_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(&source_id.to_string()).and_then(SessionSlot::live)
    }

    fn entry_by_session(&self, session_id: Uuid) -> Option<Arc<SessionEntry>> {
        self.sessions
            .find(|slot| matches!(slot, SessionSlot::Live(entry) if entry.session_id == session_id))
            .and_then(SessionSlot::live)
    }

    fn live_entries(&self) -> Vec<Arc<SessionEntry>> {
        self.sessions.values().into_iter().filter_map(SessionSlot::live).collect()
    }

    fn fail(&self, source_id: Option<&str>, error: RecorderError) -> RecorderError {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.notify(|d| d.on_error(source_id, &error));
        error
    }

    fn notify(&self, f: impl FnOnce(&dyn RecorderDelegate)) {
        if let Some(delegate) = &self.delegate {
            f(delegate.as_ref());
        }
    }

    async fn persist(&self, directory: &Path, report: &ContinuityReport) {
        if !self.config.write_manifest {
            return;
        }
        let directory = directory.to_path_buf();
        let snapshot = report.clone();
        let written = tokio::task::spawn_blocking(move || write_manifest(&snapshot, &directory))
            .await
            .map_err(|e| RecorderError::Storage(format!("manifest task failed: {}", e)))
            .and_then(|result| result);
        if let Err(e) = written {
            log::warn!("manifest for {} not written: {}", report.source_id, e);
        }
    }
}

fn validate_source_id(source_id: &str) -> Result<(), RecorderError> {
    if source_id.trim().is_empty() {
        return Err(RecorderError::Validation("source id is empty".into()));
    }
    if source_id == "." || source_id == ".." || source_id.contains(['/', '\\']) {
        return Err(RecorderError::Validation(format!(
            "source id {:?} is not a valid directory name",
            source_id
        )));
    }
    Ok(())
}

/// New recordings are refused with `StorageBlocked` when the gate reports
/// critical usage.
fn admission_error(error: RecorderError) -> RecorderError {
    match error {
        RecorderError::StorageCritical { usage_percent } => RecorderError::StorageBlocked { usage_percent },
        other => other,
    }
}

fn tracker_error(error: TrackerError, source_id: &str) -> RecorderError {
    match error {
        TrackerError::NoActiveSegment => RecorderError::NoActiveSegment(source_id.to_string()),
        TrackerError::SegmentStillOpen(index) => {
            RecorderError::Validation(format!("{}: segment {} is still open", source_id, index))
        }
    }
}

async fn remove_segment_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("removed pruned segment {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove pruned segment {}: {}", path.display(), e),
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("active", &self.active_count())
            .finish()
    }
}
