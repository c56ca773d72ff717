use std::path::Path;

use crate::models::error::RecorderError;
use crate::models::storage::DiskUsage;

/// Filesystem capacity sampling.
///
/// Implemented by:
/// - `Fs2DiskProbe` (camrec-unix)
pub trait DiskUsageProbe: Send + Sync {
    /// Capacity of the filesystem that holds `path`.
    fn sample(&self, path: &Path) -> Result<DiskUsage, RecorderError>;
}
