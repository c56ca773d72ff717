mod cleanup;
mod manifest;
mod monitor;

pub use cleanup::{free_oldest, remove_older_than, CleanupReport};
pub use manifest::{manifest_path, read_manifest, write_manifest, MANIFEST_FILE};
pub use monitor::StorageMonitor;
