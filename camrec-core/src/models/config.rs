use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::RecorderError;

/// Top-level engine configuration.
///
/// Every section has working defaults so a partially specified document
/// deserializes cleanly. Loading the document is left to the caller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub session: SessionConfig,
    pub supervisor: SupervisorConfig,
    pub storage: StorageConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub health: HealthConfig,
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<(), RecorderError> {
        self.session.validate()?;
        self.supervisor.validate()?;
        self.storage.validate()?;
        self.breaker.validate()?;
        self.retry.validate()?;
        self.health.validate()?;
        Ok(())
    }
}

/// Session, rotation and retention settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Root directory; each session writes under `<root>/<source>/<continuity>/`.
    pub output_root: PathBuf,

    /// Segment file extension, without the dot.
    pub segment_extension: String,

    /// Rotate once the active segment reaches this many bytes.
    pub max_segment_bytes: u64,

    /// Rotate once the active segment has been open this long.
    pub max_segment_duration_secs: u64,

    /// Segments retained per session; older ones are pruned from disk.
    pub max_segments: usize,

    /// Cap on concurrently recording sessions.
    pub max_active_sessions: usize,

    /// Rotation check interval.
    pub rotation_poll_interval_ms: u64,

    /// Relaunch into a fresh segment when the encoder dies on its own.
    pub restart_on_encoder_exit: bool,

    /// Write `continuity.json` next to the segments on rotation and stop.
    pub write_manifest: bool,
}

impl SessionConfig {
    pub fn max_segment_duration(&self) -> Duration {
        Duration::from_secs(self.max_segment_duration_secs)
    }

    pub fn rotation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.rotation_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.segment_extension.trim().is_empty() {
            return Err(invalid("segment extension must not be empty"));
        }
        if self.max_segment_bytes == 0 {
            return Err(invalid("max segment bytes must be positive"));
        }
        if self.max_segment_duration_secs == 0 {
            return Err(invalid("max segment duration must be positive"));
        }
        if self.max_segments == 0 {
            return Err(invalid("max segments must be at least 1"));
        }
        if self.max_active_sessions == 0 {
            return Err(invalid("max active sessions must be at least 1"));
        }
        if self.rotation_poll_interval_ms == 0 {
            return Err(invalid("rotation poll interval must be positive"));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("recordings"),
            segment_extension: "mp4".into(),
            max_segment_bytes: 512 * 1024 * 1024,
            max_segment_duration_secs: 15 * 60,
            max_segments: 96,
            max_active_sessions: 32,
            rotation_poll_interval_ms: 5_000,
            restart_on_encoder_exit: true,
            write_manifest: true,
        }
    }
}

/// Encoder process supervision settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long a terminated encoder gets to flush before it is killed.
    pub grace_period_ms: u64,
}

impl SupervisorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn validate(&self) -> Result<(), RecorderError> {
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { grace_period_ms: 5_000 }
    }
}

/// Storage policing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory whose filesystem is sampled and cleaned.
    pub watch_path: PathBuf,

    /// Usage percentage that triggers age-based cleanup.
    pub warn_percent: f64,

    /// Usage percentage that blocks new sessions and triggers emergency cleanup.
    pub block_percent: f64,

    pub poll_interval_ms: u64,

    /// Files older than this are removed once usage passes `warn_percent`.
    pub cleanup_max_age_secs: u64,

    /// Files modified more recently than this are never removed.
    pub min_file_age_secs: u64,

    /// Extensions eligible for cleanup; empty means every file.
    pub cleanup_extensions: Vec<String>,

    /// Minimum gap between two notifications for the same alert condition.
    pub alert_cooldown_secs: u64,
}

impl StorageConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_secs)
    }

    pub fn min_file_age(&self) -> Duration {
        Duration::from_secs(self.min_file_age_secs)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }

    pub fn validate(&self) -> Result<(), RecorderError> {
        let in_range = |p: f64| p > 0.0 && p <= 100.0;
        if !in_range(self.warn_percent) || !in_range(self.block_percent) {
            return Err(invalid("storage thresholds must be within (0, 100]"));
        }
        if self.warn_percent > self.block_percent {
            return Err(invalid(format!(
                "warn threshold {} exceeds block threshold {}",
                self.warn_percent, self.block_percent
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("storage poll interval must be positive"));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            watch_path: PathBuf::from("recordings"),
            warn_percent: 80.0,
            block_percent: 90.0,
            poll_interval_ms: 30_000,
            cleanup_max_age_secs: 7 * 24 * 3600,
            min_file_age_secs: 60,
            cleanup_extensions: vec!["mp4".into(), "mkv".into(), "ts".into()],
            alert_cooldown_secs: 300,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures while closed that open the circuit.
    pub failure_threshold: u32,

    /// Failures that force the circuit open from any state.
    pub max_failures: u32,

    pub recovery_timeout_ms: u64,
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.failure_threshold == 0 {
            return Err(invalid("failure threshold must be at least 1"));
        }
        if self.max_failures < self.failure_threshold {
            return Err(invalid(format!(
                "max failures {} is below failure threshold {}",
                self.max_failures, self.failure_threshold
            )));
        }
        Ok(())
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            max_failures: 10,
            recovery_timeout_ms: 30_000,
        }
    }
}

/// Backoff policy for relay-facing operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fractional jitter applied to each delay (0.25 means ±25%).
    pub jitter: f64,
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.max_attempts == 0 {
            return Err(invalid("retry attempts must be at least 1"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(invalid("base delay exceeds max delay"));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(invalid("jitter must be within [0, 1)"));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.25,
        }
    }
}

/// Relay health polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub poll_interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl HealthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.poll_interval_ms == 0 {
            return Err(invalid("health poll interval must be positive"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(invalid("health probe timeout must be positive"));
        }
        Ok(())
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            probe_timeout_ms: 5_000,
        }
    }
}

fn invalid(message: impl Into<String>) -> RecorderError {
    RecorderError::Validation(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RecorderConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_storage_thresholds() {
        let config = StorageConfig {
            warn_percent: 95.0,
            block_percent: 90.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RecorderError::Validation(_))));
    }

    #[test]
    fn rejects_max_failures_below_threshold() {
        let config = BreakerConfig {
            failure_threshold: 5,
            max_failures: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_retention() {
        let config = SessionConfig {
            max_segments: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let json = r#"{ "session": { "max_segments": 4 }, "breaker": { "failure_threshold": 2 } }"#;
        let config: RecorderConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.session.max_segments, 4);
        assert_eq!(config.session.segment_extension, "mp4");
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.max_failures, 10);
        assert_eq!(config.health, HealthConfig::default());
        config.validate().unwrap();
    }
}
