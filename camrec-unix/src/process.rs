use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use async_trait::async_trait;
use camrec_core::{EncoderChild, ExitOutcome, ProcessSpawner, RecorderError};
use tokio::process::{Child, Command};

/// Spawns encoders as child processes of the engine.
///
/// Children are killed when their handle is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessSpawner;

impl TokioProcessSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for TokioProcessSpawner {
    fn spawn(&self, argv: &[String]) -> Result<Box<dyn EncoderChild>, RecorderError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RecorderError::Validation("encoder command is empty".into()))?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecorderError::LaunchFailed(format!("{}: {}", program, e)))?;

        log::debug!("spawned {} (pid {:?})", program, child.id());
        Ok(Box::new(TokioChild { child }))
    }

    fn is_running(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // Signal 0 checks existence; EPERM still means the pid is alive.
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

struct TokioChild {
    child: Child,
}

#[async_trait]
impl EncoderChild for TokioChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn request_stop(&mut self) -> io::Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = libc::pid_t::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    fn force_kill(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    async fn wait(&mut self) -> io::Result<ExitOutcome> {
        let status = self.child.wait().await?;
        if let Some(signal) = status.signal() {
            log::debug!("encoder terminated by signal {}", signal);
        }
        Ok(ExitOutcome { code: status.code() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let spawner = TokioProcessSpawner::new();
        let mut child = spawner.spawn(&argv(&["sh", "-c", "exit 3"])).unwrap();

        let outcome = child.wait().await.unwrap();
        assert_eq!(outcome.code, Some(3));
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn sigterm_stops_a_running_encoder() {
        let spawner = TokioProcessSpawner::new();
        let mut child = spawner.spawn(&argv(&["sleep", "30"])).unwrap();
        let pid = child.pid().unwrap();
        assert!(spawner.is_running(pid));

        child.request_stop().unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.code, None);
    }

    #[tokio::test]
    async fn force_kill_ends_a_process_ignoring_sigterm() {
        let spawner = TokioProcessSpawner::new();
        let mut child = spawner
            .spawn(&argv(&["sh", "-c", "trap '' TERM; exec sleep 30"]))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        child.request_stop().unwrap();
        let early = tokio::time::timeout(Duration::from_millis(200), child.wait()).await;
        assert!(early.is_err());

        child.force_kill().unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.code, None);
    }

    #[test]
    fn missing_binary_is_a_launch_failure() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let _guard = runtime.enter();

        let result = TokioProcessSpawner::new().spawn(&argv(&["/nonexistent/camrec-encoder"]));
        assert!(matches!(result, Err(RecorderError::LaunchFailed(_))));
    }

    #[test]
    fn empty_command_is_rejected() {
        let result = TokioProcessSpawner::new().spawn(&[]);
        assert!(matches!(result, Err(RecorderError::Validation(_))));
    }
}
