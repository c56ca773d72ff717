use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ProcessStatus;

/// Supervisor-assigned identifier of an encoder process.
///
/// Independent of the OS pid, which may be reused after the process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enc-{}", self.0)
    }
}

/// Snapshot of a process-table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub pid: Option<u32>,
    pub output_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub status: ProcessStatus,
    pub argv: Vec<String>,
}

/// How an encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitOutcome {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Size and modification time of a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size_bytes: u64,
    pub modified: std::time::SystemTime,
}
