//! In-memory implementations of the engine seams.
//!
//! Used by this crate's tests and by downstream integration tests that need
//! an engine without real encoders, disks or relays.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::models::error::RecorderError;
use crate::models::process::ExitOutcome;
use crate::models::storage::DiskUsage;
use crate::traits::disk_probe::DiskUsageProbe;
use crate::traits::health_probe::HealthProbe;
use crate::traits::process_spawner::{EncoderChild, ProcessSpawner};

/// One fake encoder. Exits when told to, or on stop/kill requests.
pub struct FakeProcess {
    pub pid: u32,
    pub argv: Vec<String>,
    ignores_stop: bool,
    stop_requests: AtomicU32,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
}

impl FakeProcess {
    /// Simulate the encoder exiting on its own.
    pub fn exit(&self, code: Option<i32>) {
        self.exit_tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(ExitOutcome { code });
                true
            } else {
                false
            }
        });
    }

    pub fn is_running(&self) -> bool {
        self.exit_tx.borrow().is_none()
    }

    pub fn stop_requests(&self) -> u32 {
        self.stop_requests.load(Ordering::SeqCst)
    }

    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        *self.exit_tx.borrow()
    }
}

struct FakeChild {
    process: Arc<FakeProcess>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
}

#[async_trait]
impl EncoderChild for FakeChild {
    fn pid(&self) -> Option<u32> {
        Some(self.process.pid)
    }

    fn request_stop(&mut self) -> io::Result<()> {
        self.process.stop_requests.fetch_add(1, Ordering::SeqCst);
        if !self.process.ignores_stop {
            self.process.exit(Some(0));
        }
        Ok(())
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.process.exit(None);
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ExitOutcome> {
        let outcome = *self
            .exit_rx
            .wait_for(|slot| slot.is_some())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "fake process dropped"))?;
        Ok(outcome.unwrap_or(ExitOutcome { code: None }))
    }
}

#[derive(Default)]
struct SpawnerState {
    next_pid: u32,
    processes: HashMap<u32, Arc<FakeProcess>>,
    spawned: Vec<Arc<FakeProcess>>,
    failures: VecDeque<String>,
}

/// Spawner that hands out `FakeProcess`es and records every argv.
#[derive(Default)]
pub struct FakeSpawner {
    state: Mutex<SpawnerState>,
    ignores_stop: AtomicBool,
    spawn_delay: Mutex<Option<Duration>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes spawned from now on ignore graceful stop requests.
    pub fn ignore_stop_requests(&self, ignore: bool) {
        self.ignores_stop.store(ignore, Ordering::SeqCst);
    }

    /// Block every later spawn for `delay`, like an encoder slow to exec.
    pub fn delay_spawns(&self, delay: Duration) {
        *self.spawn_delay.lock() = Some(delay);
    }

    /// Make the next spawn fail with `LaunchFailed(message)`.
    pub fn fail_next(&self, message: &str) {
        self.state.lock().failures.push_back(message.to_string());
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().spawned.len()
    }

    pub fn spawned(&self) -> Vec<Arc<FakeProcess>> {
        self.state.lock().spawned.clone()
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().spawned.iter().filter(|p| p.is_running()).count()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, argv: &[String]) -> Result<Box<dyn EncoderChild>, RecorderError> {
        let delay = *self.spawn_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock();
        if let Some(message) = state.failures.pop_front() {
            return Err(RecorderError::LaunchFailed(message));
        }

        state.next_pid += 1;
        let (exit_tx, exit_rx) = watch::channel(None);
        let process = Arc::new(FakeProcess {
            pid: 10_000 + state.next_pid,
            argv: argv.to_vec(),
            ignores_stop: self.ignores_stop.load(Ordering::SeqCst),
            stop_requests: AtomicU32::new(0),
            exit_tx,
        });
        state.processes.insert(process.pid, Arc::clone(&process));
        state.spawned.push(Arc::clone(&process));

        Ok(Box::new(FakeChild { process, exit_rx }))
    }

    fn is_running(&self, pid: u32) -> bool {
        self.state.lock().processes.get(&pid).is_some_and(|p| p.is_running())
    }
}

/// Disk probe returning whatever usage the test last set.
pub struct StaticDiskProbe {
    usage: Mutex<Result<DiskUsage, RecorderError>>,
    samples: AtomicUsize,
}

impl StaticDiskProbe {
    pub fn new(total_bytes: u64, available_bytes: u64) -> Self {
        Self {
            usage: Mutex::new(Ok(DiskUsage {
                total_bytes,
                available_bytes,
            })),
            samples: AtomicUsize::new(0),
        }
    }

    /// Probe reporting `percent` usage of a 1000-byte filesystem.
    pub fn at_percent(percent: u64) -> Self {
        Self::new(1_000, 1_000 - percent.min(100) * 10)
    }

    pub fn set_usage(&self, total_bytes: u64, available_bytes: u64) {
        *self.usage.lock() = Ok(DiskUsage {
            total_bytes,
            available_bytes,
        });
    }

    pub fn set_percent(&self, percent: u64) {
        self.set_usage(1_000, 1_000 - percent.min(100) * 10);
    }

    pub fn fail_with(&self, error: RecorderError) {
        *self.usage.lock() = Err(error);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

impl DiskUsageProbe for StaticDiskProbe {
    fn sample(&self, _path: &Path) -> Result<DiskUsage, RecorderError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        self.usage.lock().clone()
    }
}

/// Health probe that always answers with the outcome it was built with.
pub struct StaticHealthProbe {
    outcome: Result<(), RecorderError>,
    calls: AtomicUsize,
}

impl StaticHealthProbe {
    pub fn healthy() -> Self {
        Self::answering(Ok(()))
    }

    pub fn failing() -> Self {
        Self::answering(Err(RecorderError::relay("connection refused")))
    }

    fn answering(outcome: Result<(), RecorderError>) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for StaticHealthProbe {
    async fn check(&self) -> Result<(), RecorderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}
