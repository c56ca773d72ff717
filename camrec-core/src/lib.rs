//! # camrec-core
//!
//! Platform-agnostic core of the camera recording control plane.
//!
//! Supervises external encoder processes, keeps recording sessions
//! continuous across segment rotations and encoder crashes, polices local
//! storage, and isolates relay failures behind a circuit breaker. Platform
//! backends (process spawning, filesystem capacity) implement the traits in
//! `traits/` and plug into `RecordingEngine`.
//!
//! ## Architecture
//!
//! ```text
//! camrec-core (this crate)
//! ├── traits/       ← ProcessSpawner, DiskUsageProbe, HealthProbe, CommandBuilder, RecorderDelegate
//! ├── models/       ← RecorderError, RecorderConfig, Segment, ContinuityReport, StorageSnapshot, etc.
//! ├── supervisor/   ← ProcessSupervisor (one watcher task per encoder)
//! ├── session/      ← SessionManager, SegmentTracker, rotation policy
//! ├── storage/      ← StorageMonitor, threshold cleanup, continuity manifest
//! ├── health/       ← CircuitBreaker, HealthMonitor, retry_with_backoff
//! ├── alerts/       ← pure threshold evaluation + AlertDebouncer
//! └── engine        ← RecordingEngine (lifecycle + introspection facade)
//! ```

pub mod alerts;
pub mod engine;
pub mod health;
pub mod models;
pub mod registry;
pub mod session;
pub mod storage;
pub mod supervisor;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use alerts::{AlertCondition, AlertDebouncer, AlertSeverity};
pub use engine::{Collaborators, RecordingEngine};
pub use health::{retry_with_backoff, CircuitBreaker, HealthMonitor, ProbeOutcome, RetryPolicy};
pub use models::config::{
    BreakerConfig, HealthConfig, RecorderConfig, RetryConfig, SessionConfig, StorageConfig, SupervisorConfig,
};
pub use models::error::{ErrorKind, RecorderError};
pub use models::process::{ExitOutcome, FileInfo, ProcessId, ProcessInfo};
pub use models::segment::{ContinuityReport, Segment};
pub use models::session::{RecordingSession, SessionSummary, StartOptions};
pub use models::state::{BreakerState, ProcessStatus, SessionState};
pub use models::stats::{BreakerStatus, ResourceStats};
pub use models::storage::{DiskUsage, StorageSnapshot};
pub use registry::Registry;
pub use session::{SegmentTracker, SessionManager};
pub use storage::StorageMonitor;
pub use supervisor::ProcessSupervisor;
pub use traits::command_builder::{ArgvTemplate, CommandBuilder};
pub use traits::delegate::RecorderDelegate;
pub use traits::disk_probe::DiskUsageProbe;
pub use traits::health_probe::HealthProbe;
pub use traits::process_spawner::{EncoderChild, ProcessSpawner};
