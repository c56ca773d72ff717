use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::models::error::RecorderError;
use crate::models::process::{FileInfo, ProcessId, ProcessInfo};
use crate::models::state::ProcessStatus;
use crate::registry::Registry;
use crate::traits::process_spawner::ProcessSpawner;

use super::watcher::{self, Watch};

/// Process-table entry. The watcher task owns the child handle; the entry
/// only carries what other callers may look at or signal.
pub(crate) struct ProcessEntry {
    info: Mutex<ProcessInfo>,
    stop_tx: Mutex<Option<oneshot::Sender<Duration>>>,
    done_rx: watch::Receiver<bool>,
}

impl ProcessEntry {
    pub(super) fn set_status(&self, status: ProcessStatus) {
        self.info.lock().status = status;
    }

    fn info(&self) -> ProcessInfo {
        self.info.lock().clone()
    }
}

/// Starts, signals and reaps encoder subprocesses.
///
/// Each launched process gets a watcher task that waits for its exit and
/// removes its table entry. The supervisor never owns session lifetime; the
/// session manager refers to processes only by `ProcessId`.
pub struct ProcessSupervisor {
    spawner: Arc<dyn ProcessSpawner>,
    table: Arc<Registry<ProcessId, Arc<ProcessEntry>>>,
    next_id: AtomicU64,
    default_grace: Duration,
    cancel: Mutex<CancellationToken>,
}

impl ProcessSupervisor {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, default_grace: Duration) -> Self {
        Self {
            spawner,
            table: Arc::new(Registry::new()),
            next_id: AtomicU64::new(1),
            default_grace,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Tie watcher lifetimes to `parent`. Cancelling it stops every
    /// encoder launched afterwards.
    pub fn start(&self, parent: &CancellationToken) {
        *self.cancel.lock() = parent.child_token();
    }

    /// Start an encoder writing to `output_path`.
    ///
    /// A failed spawn leaves no trace in the process table.
    pub async fn launch(&self, argv: Vec<String>, output_path: &Path) -> Result<ProcessId, RecorderError> {
        let cancel = self.cancel.lock().clone();
        if cancel.is_cancelled() {
            return Err(RecorderError::Cancelled);
        }
        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(RecorderError::Validation("encoder command is empty".into()));
        }

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RecorderError::LaunchFailed(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let child = self.spawner.spawn(&argv)?;
        let id = ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pid = child.pid();

        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = watch::channel(false);
        let entry = Arc::new(ProcessEntry {
            info: Mutex::new(ProcessInfo {
                id,
                pid,
                output_path: output_path.to_path_buf(),
                started_at: Utc::now(),
                status: ProcessStatus::Running,
                argv,
            }),
            stop_tx: Mutex::new(Some(stop_tx)),
            done_rx,
        });
        self.table.insert(id, Arc::clone(&entry));

        log::info!("encoder {} started (pid {:?}) writing {}", id, pid, output_path.display());

        tokio::spawn(watcher::run(Watch {
            id,
            entry,
            child,
            table: Arc::clone(&self.table),
            stop_rx,
            cancel: cancel.child_token(),
            done_tx,
            default_grace: self.default_grace,
        }));

        Ok(id)
    }

    /// Gracefully stop an encoder, killing it once `grace` elapses.
    ///
    /// The table entry is gone when this returns.
    pub async fn terminate(&self, id: ProcessId, grace: Duration) -> Result<(), RecorderError> {
        let entry = self.table.get(&id).ok_or(RecorderError::ProcessNotFound(id.0))?;
        entry.set_status(ProcessStatus::Stopping);

        // A concurrent terminate may already have taken the sender; both then
        // wait on the same exit signal.
        if let Some(stop_tx) = entry.stop_tx.lock().take() {
            let _ = stop_tx.send(grace);
        }

        let mut done_rx = entry.done_rx.clone();
        if done_rx.wait_for(|done| *done).await.is_err() {
            log::warn!("watcher for encoder {} ended without reporting", id);
        }

        self.table.remove(&id);
        Ok(())
    }

    /// True only if the process is still tabled and answers a liveness probe.
    pub fn is_alive(&self, id: ProcessId) -> bool {
        let Some(entry) = self.table.get(&id) else {
            return false;
        };
        let (pid, status) = {
            let info = entry.info.lock();
            (info.pid, info.status)
        };
        let live_status = matches!(status, ProcessStatus::Running | ProcessStatus::Stopping);
        live_status && pid.is_some_and(|pid| self.spawner.is_running(pid))
    }

    pub fn process_info(&self, id: ProcessId) -> Option<ProcessInfo> {
        self.table.get(&id).map(|entry| entry.info())
    }

    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> = self.table.values().iter().map(|entry| entry.info()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn active_count(&self) -> usize {
        self.table.len()
    }

    /// Terminate every tabled encoder concurrently, then cancel watchers.
    pub async fn shutdown(&self, grace: Duration) {
        let mut ids = Vec::new();
        self.table.for_each(|id, _| ids.push(*id));

        let stops = ids.into_iter().map(|id| self.terminate(id, grace));
        for result in join_all(stops).await {
            if let Err(e) = result {
                log::debug!("shutdown terminate: {}", e);
            }
        }
        self.cancel.lock().cancel();
    }

    /// Size and modification time of `path`.
    pub async fn file_info(&self, path: &Path) -> Result<FileInfo, RecorderError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| file_error(path, e))?;
        let modified = metadata.modified().map_err(|e| file_error(path, e))?;
        Ok(FileInfo {
            size_bytes: metadata.len(),
            modified,
        })
    }
}

fn file_error(path: &Path, e: io::Error) -> RecorderError {
    if e.kind() == io::ErrorKind::NotFound {
        RecorderError::FileNotFound(path.display().to_string())
    } else {
        RecorderError::Storage(format!("failed to stat {}: {}", path.display(), e))
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("active", &self.table.len())
            .finish()
    }
}
