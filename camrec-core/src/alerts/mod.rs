//! Alert evaluation and notification gating.
//!
//! Evaluation is pure: a snapshot goes in, the conditions that hold come out.
//! Whether a condition is worth notifying again is the debouncer's call.

mod debouncer;
mod evaluate;

use serde::{Deserialize, Serialize};

pub use debouncer::AlertDebouncer;
pub use evaluate::evaluate_storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// A condition that currently holds. `name` is the debounce key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub name: String,
    pub severity: AlertSeverity,
    pub message: String,
}

pub const STORAGE_WARNING: &str = "storage_warning";
pub const STORAGE_CRITICAL: &str = "storage_critical";
