use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::BreakerState;

/// Aggregate resource statistics for introspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub active_processes: usize,
    pub active_sessions: usize,
    pub total_starts: u64,
    pub total_stops: u64,
    pub total_rotations: u64,
    pub total_errors: u64,
}

/// Snapshot of circuit breaker state and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub max_failures: u32,
    /// Times the breaker moved to `Open`.
    pub activations: u64,
    /// Times a success ended a failure streak.
    pub recoveries: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}
