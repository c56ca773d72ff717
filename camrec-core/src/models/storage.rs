use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw capacity figures reported by a `DiskUsageProbe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Point-in-time storage metrics, replaced wholesale on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub usage_percent: f64,
    pub warn: bool,
    pub block: bool,
    pub sampled_at: DateTime<Utc>,
}

impl StorageSnapshot {
    pub fn from_usage(usage: DiskUsage, warn_percent: f64, block_percent: f64) -> Self {
        let available = usage.available_bytes.min(usage.total_bytes);
        let used = usage.total_bytes - available;
        let usage_percent = if usage.total_bytes == 0 {
            0.0
        } else {
            used as f64 / usage.total_bytes as f64 * 100.0
        };
        Self {
            total_bytes: usage.total_bytes,
            used_bytes: used,
            available_bytes: available,
            usage_percent,
            warn: usage_percent >= warn_percent,
            block: usage_percent >= block_percent,
            sampled_at: Utc::now(),
        }
    }

    /// Bytes that must be freed to bring usage down to `target_percent`.
    pub fn bytes_above(&self, target_percent: f64) -> u64 {
        let target = (self.total_bytes as f64 * target_percent / 100.0) as u64;
        self.used_bytes.saturating_sub(target)
    }
}
