use std::io;

use async_trait::async_trait;

use crate::models::error::RecorderError;
use crate::models::process::ExitOutcome;

/// Starts encoder processes for the supervisor.
///
/// Implemented by:
/// - `TokioProcessSpawner` (camrec-unix)
pub trait ProcessSpawner: Send + Sync {
    /// Start `argv[0]` with the remaining arguments.
    ///
    /// Must either return a running child or an error; never a half-started one.
    fn spawn(&self, argv: &[String]) -> Result<Box<dyn EncoderChild>, RecorderError>;

    /// OS-level liveness probe for a pid.
    fn is_running(&self, pid: u32) -> bool;
}

/// Handle to one spawned encoder, owned by its watcher task.
#[async_trait]
pub trait EncoderChild: Send {
    /// OS pid, if the process has not been reaped yet.
    fn pid(&self) -> Option<u32>;

    /// Ask the encoder to finish its output and exit (SIGTERM or equivalent).
    fn request_stop(&mut self) -> io::Result<()>;

    /// Kill the encoder without giving it a chance to flush.
    fn force_kill(&mut self) -> io::Result<()>;

    /// Wait for exit. Must be cancel-safe; the watcher polls it inside `select!`.
    async fn wait(&mut self) -> io::Result<ExitOutcome>;
}
