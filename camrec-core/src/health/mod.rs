//! Relay health tracking.
//!
//! ```text
//! HealthMonitor ──probe──> HealthProbe
//!      │
//!      └──record──> CircuitBreaker <──consult/record── retry_with_backoff
//! ```

mod breaker;
mod monitor;
mod retry;

pub use breaker::CircuitBreaker;
pub use monitor::{HealthMonitor, ProbeOutcome};
pub use retry::{retry_with_backoff, RetryPolicy};
