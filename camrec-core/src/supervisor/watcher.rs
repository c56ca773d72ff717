use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::models::process::{ExitOutcome, ProcessId};
use crate::models::state::ProcessStatus;
use crate::registry::Registry;
use crate::traits::process_spawner::EncoderChild;

use super::encoder_supervisor::ProcessEntry;

/// Everything a watcher task owns for the lifetime of one encoder.
pub(super) struct Watch {
    pub id: ProcessId,
    pub entry: Arc<ProcessEntry>,
    pub child: Box<dyn EncoderChild>,
    pub table: Arc<Registry<ProcessId, Arc<ProcessEntry>>>,
    pub stop_rx: oneshot::Receiver<Duration>,
    pub cancel: CancellationToken,
    pub done_tx: watch::Sender<bool>,
    pub default_grace: Duration,
}

enum Ending {
    Exited(io::Result<ExitOutcome>),
    Stopped { result: io::Result<ExitOutcome>, forced: bool },
}

/// Supervise one encoder until it exits, is asked to stop, or the
/// supervisor is cancelled. The table entry is removed exactly once, here or
/// in `terminate`, whichever runs first.
pub(super) async fn run(watch: Watch) {
    let Watch {
        id,
        entry,
        mut child,
        table,
        mut stop_rx,
        cancel,
        done_tx,
        default_grace,
    } = watch;

    let ending = tokio::select! {
        result = child.wait() => Ending::Exited(result),
        Ok(grace) = &mut stop_rx => {
            let (result, forced) = stop_child(child.as_mut(), grace).await;
            Ending::Stopped { result, forced }
        }
        _ = cancel.cancelled() => {
            entry.set_status(ProcessStatus::Stopping);
            let (result, forced) = stop_child(child.as_mut(), default_grace).await;
            Ending::Stopped { result, forced }
        }
    };

    let status = match &ending {
        Ending::Exited(Ok(outcome)) if outcome.success() => {
            log::info!("encoder {} exited cleanly", id);
            ProcessStatus::Stopped
        }
        Ending::Exited(Ok(outcome)) => {
            log::warn!("encoder {} exited unexpectedly with code {:?}", id, outcome.code);
            ProcessStatus::Failed
        }
        Ending::Exited(Err(e)) => {
            log::error!("failed to wait on encoder {}: {}", id, e);
            ProcessStatus::Failed
        }
        Ending::Stopped { result: Ok(outcome), forced } => {
            if *forced {
                log::warn!("encoder {} ignored stop request and was killed", id);
            } else {
                log::info!("encoder {} stopped with code {:?}", id, outcome.code);
            }
            ProcessStatus::Stopped
        }
        Ending::Stopped { result: Err(e), .. } => {
            log::error!("encoder {} did not stop cleanly: {}", id, e);
            ProcessStatus::Failed
        }
    };

    entry.set_status(status);
    if table.remove(&id).is_some() {
        log::debug!("encoder {} removed from process table", id);
    }
    let _ = done_tx.send(true);
}

/// Graceful stop, escalating to a kill once `grace` runs out.
///
/// Returns the exit result and whether the kill was needed.
pub(super) async fn stop_child(child: &mut dyn EncoderChild, grace: Duration) -> (io::Result<ExitOutcome>, bool) {
    if let Err(e) = child.request_stop() {
        log::warn!("stop signal failed for pid {:?}: {}", child.pid(), e);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(result) => (result, false),
        Err(_) => {
            if let Err(e) = child.force_kill() {
                log::error!("kill failed for pid {:?}: {}", child.pid(), e);
            }
            (child.wait().await, true)
        }
    }
}
