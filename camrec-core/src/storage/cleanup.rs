use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use crate::models::error::RecorderError;

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub files_removed: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Recording files under `root` with one of `extensions` (any file when
/// empty), oldest first. Directories in `protected` are not descended into.
fn collect_recordings(
    root: &Path,
    extensions: &[String],
    protected: &[PathBuf],
) -> Result<Vec<Candidate>, RecorderError> {
    let mut found = Vec::new();
    if !root.exists() {
        return Ok(found);
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && protected.iter().any(|p| p == entry.path())));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().is_some_and(|io| io.kind() == io::ErrorKind::NotFound) => continue,
            Err(e) if e.depth() > 0 => {
                log::warn!("skipping unreadable path during cleanup: {}", e);
                continue;
            }
            Err(e) => {
                return Err(RecorderError::Storage(format!(
                    "failed to list {}: {}",
                    root.display(),
                    e
                )))
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)));
        if !extensions.is_empty() && !matches {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if let Ok(modified) = metadata.modified() {
            found.push(Candidate {
                path: entry.into_path(),
                size: metadata.len(),
                modified,
            });
        }
    }

    found.sort_by_key(|c| c.modified);
    Ok(found)
}

fn age(now: SystemTime, modified: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or(Duration::ZERO)
}

fn remove(candidate: &Candidate, report: &mut CleanupReport) {
    match fs::remove_file(&candidate.path) {
        Ok(()) => {
            log::info!("removed recording {}", candidate.path.display());
            report.files_removed += 1;
            report.bytes_freed += candidate.size;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove {}: {}", candidate.path.display(), e),
    }
}

/// Delete recordings not modified for longer than `max_age`, leaving the
/// `protected` directories (those of live sessions) alone.
pub fn remove_older_than(
    root: &Path,
    extensions: &[String],
    protected: &[PathBuf],
    max_age: Duration,
    now: SystemTime,
) -> Result<CleanupReport, RecorderError> {
    let mut report = CleanupReport::default();
    for candidate in collect_recordings(root, extensions, protected)? {
        if age(now, candidate.modified) > max_age {
            remove(&candidate, &mut report);
        }
    }
    Ok(report)
}

/// Delete the oldest recordings first until `bytes_to_free` have been
/// reclaimed. Files modified within `min_age` are never touched, which keeps
/// segments still being written out of reach. Finished segments of live
/// sessions are eligible, so their continuity reports may list files this
/// pass removed.
pub fn free_oldest(
    root: &Path,
    extensions: &[String],
    bytes_to_free: u64,
    min_age: Duration,
    now: SystemTime,
) -> Result<CleanupReport, RecorderError> {
    let mut report = CleanupReport::default();
    if bytes_to_free == 0 {
        return Ok(report);
    }

    for candidate in collect_recordings(root, extensions, &[])? {
        if report.bytes_freed >= bytes_to_free {
            break;
        }
        if age(now, candidate.modified) < min_age {
            // Sorted oldest first: everything after is younger still.
            break;
        }
        remove(&candidate, &mut report);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        vec!["mp4".into(), "mkv".into()]
    }

    fn write(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    #[test]
    fn age_cleanup_only_touches_old_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let video = write(dir.path(), "cam1/a/segment_00000.mp4", 10);
        let manifest = write(dir.path(), "cam1/a/continuity.json", 10);
        let now = SystemTime::now() + Duration::from_secs(3_600);

        let report = remove_older_than(dir.path(), &exts(), &[], Duration::from_secs(60), now).unwrap();

        assert_eq!(report.files_removed, 1);
        assert_eq!(report.bytes_freed, 10);
        assert!(!video.exists());
        assert!(manifest.exists());
    }

    #[test]
    fn age_cleanup_skips_protected_directories() {
        let dir = tempfile::tempdir().unwrap();
        let live = write(dir.path(), "cam1/live/segment_00000.mp4", 10);
        let done = write(dir.path(), "cam1/done/segment_00000.mp4", 10);
        let now = SystemTime::now() + Duration::from_secs(3_600);
        let protected = vec![dir.path().join("cam1/live")];

        let report = remove_older_than(dir.path(), &exts(), &protected, Duration::from_secs(60), now).unwrap();

        assert_eq!(report.files_removed, 1);
        assert!(live.exists());
        assert!(!done.exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let foreign = write(outside.path(), "segment_00000.mp4", 10);
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let now = SystemTime::now() + Duration::from_secs(3_600);

        let report = remove_older_than(dir.path(), &exts(), &[], Duration::from_secs(60), now).unwrap();

        assert_eq!(report.files_removed, 0);
        assert!(foreign.exists());
    }

    #[test]
    fn age_cleanup_keeps_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        let video = write(dir.path(), "segment_00000.mkv", 10);

        let report =
            remove_older_than(dir.path(), &exts(), &[], Duration::from_secs(60), SystemTime::now()).unwrap();

        assert_eq!(report, CleanupReport::default());
        assert!(video.exists());
    }

    #[test]
    fn emergency_cleanup_stops_once_enough_is_freed() {
        let dir = tempfile::tempdir().unwrap();
        let first = write(dir.path(), "a/segment_00000.mp4", 100);
        std::thread::sleep(Duration::from_millis(20));
        let second = write(dir.path(), "b/segment_00000.mp4", 100);
        std::thread::sleep(Duration::from_millis(20));
        let third = write(dir.path(), "c/segment_00000.mp4", 100);
        let now = SystemTime::now() + Duration::from_secs(3_600);

        let report = free_oldest(dir.path(), &exts(), 150, Duration::from_secs(60), now).unwrap();

        assert_eq!(report.files_removed, 2);
        assert!(!first.exists());
        assert!(!second.exists());
        assert!(third.exists());
    }

    #[test]
    fn emergency_cleanup_spares_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let active = write(dir.path(), "segment_00003.mp4", 100);

        let report =
            free_oldest(dir.path(), &exts(), 1_000, Duration::from_secs(60), SystemTime::now()).unwrap();

        assert_eq!(report.files_removed, 0);
        assert!(active.exists());
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let report = remove_older_than(
            &dir.path().join("nope"),
            &exts(),
            &[],
            Duration::ZERO,
            SystemTime::now(),
        )
        .unwrap();
        assert_eq!(report.files_removed, 0);
    }
}
