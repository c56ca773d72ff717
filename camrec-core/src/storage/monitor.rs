use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::alerts::{evaluate_storage, AlertDebouncer};
use crate::models::config::StorageConfig;
use crate::models::error::RecorderError;
use crate::models::storage::StorageSnapshot;
use crate::traits::delegate::RecorderDelegate;
use crate::traits::disk_probe::DiskUsageProbe;

use super::cleanup::{self, CleanupReport};

/// Samples filesystem usage, runs threshold cleanup and gates admission.
///
/// The snapshot is replaced wholesale on every sample. `check_availability`
/// only reads it and never waits for the polling loop.
pub struct StorageMonitor {
    config: StorageConfig,
    probe: Arc<dyn DiskUsageProbe>,
    snapshot: RwLock<Option<StorageSnapshot>>,
    protected: Mutex<HashSet<PathBuf>>,
    debouncer: AlertDebouncer,
    delegate: Option<Arc<dyn RecorderDelegate>>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StorageMonitor {
    pub fn new(config: StorageConfig, probe: Arc<dyn DiskUsageProbe>) -> Self {
        let debouncer = AlertDebouncer::new(config.alert_cooldown());
        Self {
            config,
            probe,
            snapshot: RwLock::new(None),
            protected: Mutex::new(HashSet::new()),
            debouncer,
            delegate: None,
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn RecorderDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Latest snapshot, if any sample has been taken.
    pub fn snapshot(&self) -> Option<StorageSnapshot> {
        self.snapshot.read().clone()
    }

    /// Fail with `StorageCritical` while the latest snapshot is over the block
    /// threshold. Before the first sample everything is admitted.
    pub fn check_availability(&self) -> Result<(), RecorderError> {
        match self.snapshot.read().as_ref() {
            Some(snapshot) if snapshot.block => Err(RecorderError::StorageCritical {
                usage_percent: snapshot.usage_percent,
            }),
            _ => Ok(()),
        }
    }

    /// Keep age-based cleanup out of `directory` until it is released.
    pub fn protect(&self, directory: &Path) {
        self.protected.lock().insert(directory.to_path_buf());
    }

    pub fn release(&self, directory: &Path) {
        self.protected.lock().remove(directory);
    }

    pub fn protected_dirs(&self) -> Vec<PathBuf> {
        self.protected.lock().iter().cloned().collect()
    }

    /// Sample the probe now and publish the result.
    pub fn refresh(&self) -> Result<StorageSnapshot, RecorderError> {
        let usage = self.probe.sample(&self.config.watch_path)?;
        let snapshot = StorageSnapshot::from_usage(usage, self.config.warn_percent, self.config.block_percent);
        *self.snapshot.write() = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// One monitoring tick: sample, notify, clean up, and resample if
    /// anything was freed.
    pub async fn run_once(&self) -> Result<StorageSnapshot, RecorderError> {
        let snapshot = self.refresh()?;

        let due = self.debouncer.filter(evaluate_storage(&snapshot));
        for condition in &due {
            log::warn!("storage alert {}: {}", condition.name, condition.message);
            if let Some(delegate) = &self.delegate {
                delegate.on_storage_alert(condition, &snapshot);
            }
        }

        let report = if snapshot.block {
            let target = snapshot.bytes_above(self.config.warn_percent);
            log::warn!(
                "storage at {:.1}%, freeing {} bytes from {}",
                snapshot.usage_percent,
                target,
                self.config.watch_path.display()
            );
            self.clean(move |root, exts, config| {
                cleanup::free_oldest(root, exts, target, config.min_file_age(), SystemTime::now())
            })
            .await?
        } else if snapshot.warn {
            let protected = self.protected_dirs();
            self.clean(move |root, exts, config| {
                cleanup::remove_older_than(root, exts, &protected, config.cleanup_max_age(), SystemTime::now())
            })
            .await?
        } else {
            CleanupReport::default()
        };

        if report.files_removed > 0 {
            log::info!(
                "storage cleanup removed {} files ({} bytes)",
                report.files_removed,
                report.bytes_freed
            );
            return self.refresh();
        }
        Ok(snapshot)
    }

    async fn clean<F>(&self, pass: F) -> Result<CleanupReport, RecorderError>
    where
        F: FnOnce(&Path, &[String], &StorageConfig) -> Result<CleanupReport, RecorderError>
            + Send
            + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || pass(&config.watch_path, &config.cleanup_extensions, &config))
            .await
            .map_err(|e| RecorderError::Storage(format!("cleanup task failed: {}", e)))?
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
                        if let Err(e) = monitor.run_once().await {
                            log::error!("storage check failed: {}", e);
                            if let Some(delegate) = &monitor.delegate {
                                delegate.on_error(None, &e);
                            }
                        }
                    }
                }
            }
            log::debug!("storage loop stopped");
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
}

impl std::fmt::Debug for StorageMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageMonitor")
            .field("watch_path", &self.config.watch_path)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertCondition, STORAGE_CRITICAL, STORAGE_WARNING};
    use crate::testing::StaticDiskProbe;
    use std::time::Duration;

    #[derive(Default)]
    struct AlertLog(Mutex<Vec<String>>);

    impl RecorderDelegate for AlertLog {
        fn on_storage_alert(&self, condition: &AlertCondition, _snapshot: &StorageSnapshot) {
            self.0.lock().push(condition.name.clone());
        }
    }

    fn config(root: &Path) -> StorageConfig {
        StorageConfig {
            watch_path: root.to_path_buf(),
            poll_interval_ms: 10,
            min_file_age_secs: 0,
            cleanup_max_age_secs: 0,
            ..StorageConfig::default()
        }
    }

    #[test]
    fn availability_is_open_before_first_sample() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = StorageMonitor::new(config(dir.path()), Arc::new(StaticDiskProbe::at_percent(99)));

        assert!(monitor.snapshot().is_none());
        assert!(monitor.check_availability().is_ok());
    }

    #[test]
    fn block_threshold_rejects_admission() {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(StaticDiskProbe::at_percent(95));
        let monitor = StorageMonitor::new(config(dir.path()), probe.clone());

        let snapshot = monitor.refresh().unwrap();
        assert!(snapshot.block);
        assert!(matches!(
            monitor.check_availability(),
            Err(RecorderError::StorageCritical { .. })
        ));

        probe.set_percent(50);
        monitor.refresh().unwrap();
        assert!(monitor.check_availability().is_ok());
    }

    #[test]
    fn failed_sample_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(StaticDiskProbe::at_percent(40));
        let monitor = StorageMonitor::new(config(dir.path()), probe.clone());
        monitor.refresh().unwrap();

        probe.fail_with(RecorderError::Storage("statvfs failed".into()));

        assert!(monitor.refresh().is_err());
        assert!(!monitor.snapshot().unwrap().warn);
    }

    #[tokio::test]
    async fn warn_tick_removes_aged_recordings() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("cam1").join("segment_00000.mp4");
        std::fs::create_dir_all(old.parent().unwrap()).unwrap();
        std::fs::write(&old, vec![0u8; 64]).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let monitor = StorageMonitor::new(config(dir.path()), Arc::new(StaticDiskProbe::at_percent(85)));
        let snapshot = monitor.run_once().await.unwrap();

        assert!(snapshot.warn);
        assert!(!old.exists());
    }

    #[tokio::test]
    async fn warn_tick_spares_protected_directories() {
        let dir = tempfile::tempdir().unwrap();
        let live_dir = dir.path().join("cam1").join("live");
        let live = live_dir.join("segment_00000.mp4");
        let done = dir.path().join("cam1").join("done").join("segment_00000.mp4");
        for path in [&live, &done] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, vec![0u8; 64]).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let monitor = StorageMonitor::new(config(dir.path()), Arc::new(StaticDiskProbe::at_percent(85)));
        monitor.protect(&live_dir);
        monitor.run_once().await.unwrap();

        assert!(live.exists());
        assert!(!done.exists());

        monitor.release(&live_dir);
        assert!(monitor.protected_dirs().is_empty());
        monitor.run_once().await.unwrap();
        assert!(!live.exists());
    }

    #[tokio::test]
    async fn alerts_are_debounced_across_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let alerts = Arc::new(AlertLog::default());
        let probe = Arc::new(StaticDiskProbe::at_percent(85));
        let monitor = StorageMonitor::new(config(dir.path()), probe.clone()).with_delegate(alerts.clone());

        monitor.run_once().await.unwrap();
        monitor.run_once().await.unwrap();
        probe.set_percent(95);
        monitor.run_once().await.unwrap();
        probe.set_percent(10);
        monitor.run_once().await.unwrap();

        assert_eq!(
            *alerts.0.lock(),
            vec![STORAGE_WARNING.to_string(), STORAGE_CRITICAL.to_string()]
        );
    }

    #[tokio::test]
    async fn loop_samples_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(StaticDiskProbe::at_percent(20));
        let monitor = Arc::new(StorageMonitor::new(config(dir.path()), probe.clone()));
        let root = CancellationToken::new();

        monitor.start(&root);
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(probe.sample_count() >= 2);
        assert!(!monitor.is_running());
        assert!(monitor.snapshot().is_some());
    }
}
