use std::path::Path;

use camrec_core::{DiskUsage, DiskUsageProbe, RecorderError};

/// Samples the filesystem holding a path.
///
/// A path that does not exist yet (the recordings root before the first
/// session) is measured at its nearest existing ancestor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fs2DiskProbe;

impl DiskUsageProbe for Fs2DiskProbe {
    fn sample(&self, path: &Path) -> Result<DiskUsage, RecorderError> {
        let target = path
            .ancestors()
            .find(|p| !p.as_os_str().is_empty() && p.exists())
            .unwrap_or_else(|| Path::new("."));

        let total_bytes = fs2::total_space(target)
            .map_err(|e| RecorderError::Storage(format!("statvfs {}: {}", target.display(), e)))?;
        let available_bytes = fs2::available_space(target)
            .map_err(|e| RecorderError::Storage(format!("statvfs {}: {}", target.display(), e)))?;

        Ok(DiskUsage {
            total_bytes,
            available_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let usage = Fs2DiskProbe.sample(dir.path()).unwrap();

        assert!(usage.total_bytes > 0);
        assert!(usage.available_bytes <= usage.total_bytes);
    }

    #[test]
    fn missing_path_falls_back_to_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not/yet/created");

        let direct = Fs2DiskProbe.sample(dir.path()).unwrap();
        let fallback = Fs2DiskProbe.sample(&missing).unwrap();

        assert_eq!(direct.total_bytes, fallback.total_bytes);
    }
}
