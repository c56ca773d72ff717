use crate::alerts::AlertCondition;
use crate::models::error::RecorderError;
use crate::models::segment::Segment;
use crate::models::state::{BreakerState, SessionState};
use crate::models::storage::StorageSnapshot;

/// Event delegate for engine notifications.
///
/// Methods are called from background tasks, never while an engine lock is
/// held. Implementations should return quickly. Every method has an empty
/// default so implementors pick only the events they care about.
pub trait RecorderDelegate: Send + Sync {
    /// A session moved to a new state.
    fn on_session_state_changed(&self, _source_id: &str, _state: SessionState) {}

    /// Segment `finished` was finalized and `started` opened in its place.
    fn on_segment_rotated(&self, _source_id: &str, _finished: &Segment, _started: &Segment) {}

    /// Segments removed by retention pruning.
    fn on_segments_pruned(&self, _source_id: &str, _pruned: &[Segment]) {}

    /// A storage threshold fired and was not suppressed by the debouncer.
    fn on_storage_alert(&self, _condition: &AlertCondition, _snapshot: &StorageSnapshot) {}

    /// The relay circuit breaker changed state.
    fn on_breaker_state_changed(&self, _from: BreakerState, _to: BreakerState) {}

    /// A background operation failed.
    fn on_error(&self, _source_id: Option<&str>, _error: &RecorderError) {}
}
