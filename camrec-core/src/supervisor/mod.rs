//! Encoder process supervision.
//!
//! ```text
//! launch ─→ [process table] ←─ terminate / is_alive
//!    └─→ watcher task ── waits exit | stop request | cancellation
//!                          └─→ removes table entry exactly once
//! ```

mod encoder_supervisor;
mod watcher;

pub use encoder_supervisor::ProcessSupervisor;
