use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::config::SessionConfig;
use crate::models::error::RecorderError;
use crate::models::session::StartOptions;

use super::manager::{ManagerInner, SessionEntry};

/// Why a segment was rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationReason {
    Manual,
    Size,
    Duration,
    /// The encoder died; recording resumes in a fresh segment.
    EncoderExited,
}

impl std::fmt::Display for RotationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::Size => "size limit",
            Self::Duration => "duration limit",
            Self::EncoderExited => "encoder exit",
        };
        f.write_str(s)
    }
}

/// Per-session segment limits: config defaults overridden by start options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLimits {
    pub max_bytes: u64,
    pub max_duration: Duration,
    pub max_segments: usize,
}

impl SegmentLimits {
    pub fn resolve(config: &SessionConfig, options: &StartOptions) -> Result<Self, RecorderError> {
        let limits = Self {
            max_bytes: options.max_segment_bytes.unwrap_or(config.max_segment_bytes),
            max_duration: options
                .max_segment_duration_secs
                .map_or(config.max_segment_duration(), Duration::from_secs),
            max_segments: options.max_segments.unwrap_or(config.max_segments),
        };
        if limits.max_bytes == 0 || limits.max_duration.is_zero() || limits.max_segments == 0 {
            return Err(RecorderError::Validation("segment limits must be positive".into()));
        }
        Ok(limits)
    }
}

/// Decide whether the active segment must rotate. At most one reason is
/// returned, so a tick where several limits trip still rotates once.
pub fn rotation_due(
    size_bytes: u64,
    elapsed: Duration,
    limits: &SegmentLimits,
    encoder_alive: bool,
) -> Option<RotationReason> {
    if !encoder_alive {
        Some(RotationReason::EncoderExited)
    } else if size_bytes >= limits.max_bytes {
        Some(RotationReason::Size)
    } else if elapsed >= limits.max_duration {
        Some(RotationReason::Duration)
    } else {
        None
    }
}

/// Per-session rotation loop. Holds the manager weakly so a dropped manager
/// ends the loop on its next tick.
pub(super) async fn run(
    manager: Weak<ManagerInner>,
    entry: Arc<SessionEntry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(manager) = manager.upgrade() else {
            break;
        };
        if !manager.check_rotation(&entry).await {
            break;
        }
    }
    log::debug!("rotation loop for {} stopped", entry.source_id);
}
