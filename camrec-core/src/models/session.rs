use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::process::ProcessId;
use super::state::SessionState;

/// Per-session options handed to `start_session`.
///
/// Threshold overrides fall back to the engine-wide `SessionConfig`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    /// Stream location the encoder pulls from (for example an RTSP URL).
    pub input: String,

    /// Free-form settings forwarded to the command builder.
    pub encoder_settings: BTreeMap<String, String>,

    pub max_segment_bytes: Option<u64>,
    pub max_segment_duration_secs: Option<u64>,
    pub max_segments: Option<usize>,
}

/// One logical recording instance.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSession {
    pub id: Uuid,
    pub source_id: String,
    pub continuity_id: Uuid,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    /// Set exactly when `state` becomes `Stopped`.
    pub ended_at: Option<DateTime<Utc>>,
    /// Encoder currently writing the active segment.
    pub encoder: Option<ProcessId>,
}

impl RecordingSession {
    pub fn new(source_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.to_string(),
            continuity_id: Uuid::new_v4(),
            state: SessionState::Recording,
            started_at: Utc::now(),
            ended_at: None,
            encoder: None,
        }
    }

    /// Elapsed recording time, frozen once the session ends.
    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        let end = self.ended_at.unwrap_or(now);
        (end - self.started_at).to_std().unwrap_or_default()
    }
}

/// Lightweight listing entry for active sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub source_id: String,
    pub continuity_id: Uuid,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub active_segment_index: Option<u32>,
    pub segment_count: usize,
}
