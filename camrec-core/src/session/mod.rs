//! Recording sessions and segment continuity.
//!
//! ```text
//! start ──> Recording ──stop──> Stopping ──> Stopped
//!              │  ▲
//!   rotate ────┘  └──── finalize(N) then open(N+1), same continuity ID
//! ```

mod manager;
mod rotation;
mod segments;

pub use manager::SessionManager;
pub use rotation::{rotation_due, RotationReason, SegmentLimits};
pub use segments::{SegmentTracker, TrackerError};
