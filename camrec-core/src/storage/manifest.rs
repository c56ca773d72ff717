use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::RecorderError;
use crate::models::segment::ContinuityReport;

pub const MANIFEST_FILE: &str = "continuity.json";

pub fn manifest_path(session_dir: &Path) -> PathBuf {
    session_dir.join(MANIFEST_FILE)
}

/// Write the continuity manifest for a session directory.
///
/// Written to a temporary file and renamed into place so readers never see
/// a partial document.
pub fn write_manifest(report: &ContinuityReport, session_dir: &Path) -> Result<(), RecorderError> {
    fs::create_dir_all(session_dir)
        .map_err(|e| RecorderError::Storage(format!("failed to create {}: {}", session_dir.display(), e)))?;

    let json = serde_json::to_string_pretty(report)
        .map_err(|e| RecorderError::Storage(format!("failed to serialize manifest: {}", e)))?;
    let target = manifest_path(session_dir);
    let staging = target.with_extension("json.tmp");
    fs::write(&staging, json)
        .map_err(|e| RecorderError::Storage(format!("failed to write manifest: {}", e)))?;
    fs::rename(&staging, &target)
        .map_err(|e| RecorderError::Storage(format!("failed to commit manifest: {}", e)))?;
    Ok(())
}

/// Read a session's continuity manifest back from disk.
pub fn read_manifest(session_dir: &Path) -> Result<ContinuityReport, RecorderError> {
    let path = manifest_path(session_dir);
    let json = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RecorderError::FileNotFound(path.display().to_string())
        } else {
            RecorderError::Storage(format!("failed to read manifest: {}", e))
        }
    })?;
    serde_json::from_str(&json).map_err(|e| RecorderError::Storage(format!("failed to parse manifest: {}", e)))
}
