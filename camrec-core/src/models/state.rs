use serde::{Deserialize, Serialize};

/// Recording session state machine.
///
/// ```text
/// recording → stopping → stopped
/// ```
///
/// No transition skips a state. `Stopping` is observed by an in-flight
/// rotation, which then declines to open a new segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Recording,
    Stopping,
    Stopped,
}

impl SessionState {
    /// Whether `next` is the single legal successor of this state.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Recording, Self::Stopping) | (Self::Stopping, Self::Stopped)
        )
    }
}

/// Lifecycle of a supervised encoder process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Circuit breaker states.
///
/// ```text
/// closed → open → half_open → closed
///            ↑________|  (failure while half-open)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    /// Operations are still attempted in `Closed` and `HalfOpen`.
    pub fn allows_requests(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_transitions_never_skip() {
        assert!(SessionState::Recording.can_transition_to(SessionState::Stopping));
        assert!(SessionState::Stopping.can_transition_to(SessionState::Stopped));
        assert!(!SessionState::Recording.can_transition_to(SessionState::Stopped));
        assert!(!SessionState::Stopped.can_transition_to(SessionState::Recording));
    }

    #[test]
    fn breaker_state_serializes_snake_case() {
        let json = serde_json::to_string(&BreakerState::HalfOpen).unwrap();
        assert_eq!(json, "\"half_open\"");
    }
}
