use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::SessionState;

/// One physical output file of a recording session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub index: u32,
    pub continuity_id: Uuid,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    /// `None` while the encoder is still writing this segment.
    pub ended_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

impl Segment {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Wall-clock span of the segment; open segments are measured up to `now`.
    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        let end = self.ended_at.unwrap_or(now);
        (end - self.started_at).to_std().unwrap_or_default()
    }
}

/// Read-only projection of a session's continuity.
///
/// Also the on-disk shape of the `continuity.json` manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityReport {
    pub session_id: Uuid,
    pub source_id: String,
    pub continuity_id: Uuid,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Segments currently retained.
    pub segment_count: usize,
    /// Segments opened over the session's lifetime, pruned ones included.
    pub segments_opened: u32,
    pub elapsed_secs: f64,
    pub segments: Vec<Segment>,
}

impl ContinuityReport {
    pub fn active_segment(&self) -> Option<&Segment> {
        self.segments.iter().find(|s| s.is_active())
    }

    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.size_bytes).sum()
    }
}
