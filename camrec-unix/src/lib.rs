//! # camrec-unix
//!
//! Unix backend for camrec.
//!
//! Provides:
//! - `TokioProcessSpawner`: encoder processes via `tokio::process`, stopped with SIGTERM
//! - `Fs2DiskProbe`: filesystem capacity via `statvfs`
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use camrec_core::{ArgvTemplate, Collaborators, RecorderConfig, RecordingEngine};
//! use camrec_unix::{Fs2DiskProbe, TokioProcessSpawner};
//!
//! let engine = RecordingEngine::new(
//!     RecorderConfig::default(),
//!     Collaborators {
//!         spawner: Arc::new(TokioProcessSpawner::new()),
//!         disk_probe: Arc::new(Fs2DiskProbe),
//!         health_probe,
//!         command_builder: Arc::new(ArgvTemplate::new(["ffmpeg", "-i", "{input}", "{output}"])),
//!         delegate: None,
//!     },
//! )?;
//! engine.start();
//! ```

#[cfg(unix)]
pub mod disk_usage;
#[cfg(unix)]
pub mod process;

#[cfg(unix)]
pub use disk_usage::Fs2DiskProbe;
#[cfg(unix)]
pub use process::TokioProcessSpawner;
