pub mod config;
pub mod error;
pub mod process;
pub mod segment;
pub mod session;
pub mod state;
pub mod stats;
pub mod storage;
