use std::time::Duration;

use thiserror::Error;

/// Coarse error taxonomy used for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input, rejected before any side effect.
    Validation,
    /// Unknown session, process or file.
    NotFound,
    /// Storage block threshold or session limit reached.
    ResourceExhausted,
    /// Encoder launch failure or unreachable relay.
    ExternalFailure,
    /// Operation skipped because the circuit is open.
    BreakerOpen,
    /// The service is shutting down.
    Cancelled,
}

/// Errors surfaced by the recording engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecorderError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("process not found: {0}")]
    ProcessNotFound(u64),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("session {0} has no active segment")]
    NoActiveSegment(String),

    #[error("session {0} is stopping")]
    SessionStopping(String),

    #[error("source {0} is already recording")]
    AlreadyRecording(String),

    #[error("storage blocked at {usage_percent:.1}% usage")]
    StorageBlocked { usage_percent: f64 },

    #[error("storage critical at {usage_percent:.1}% usage")]
    StorageCritical { usage_percent: f64 },

    #[error("too many active sessions (limit {0})")]
    TooManySessions(usize),

    #[error("encoder launch failed: {0}")]
    LaunchFailed(String),

    #[error("relay request failed{}: {message}", status_suffix(.status))]
    Relay { status: Option<u16>, message: String },

    #[error("relay probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("circuit breaker is open")]
    BreakerOpen,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" with status {code}")).unwrap_or_default()
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::SessionNotFound(_)
            | Self::ProcessNotFound(_)
            | Self::FileNotFound(_)
            | Self::NoActiveSegment(_)
            | Self::SessionStopping(_) => ErrorKind::NotFound,
            Self::AlreadyRecording(_)
            | Self::StorageBlocked { .. }
            | Self::StorageCritical { .. }
            | Self::TooManySessions(_) => ErrorKind::ResourceExhausted,
            Self::LaunchFailed(_) | Self::Relay { .. } | Self::ProbeTimeout(_) | Self::Storage(_) => {
                ErrorKind::ExternalFailure
            }
            Self::BreakerOpen => ErrorKind::BreakerOpen,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a relay-facing retry loop may attempt the operation again.
    ///
    /// Client-class relay responses are terminal except request timeout (408),
    /// too early (425) and rate limiting (429).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Relay { status: Some(code), .. } => {
                matches!(code, 408 | 425 | 429) || !(400..500).contains(code)
            }
            Self::Relay { status: None, .. } | Self::ProbeTimeout(_) => true,
            _ => false,
        }
    }

    /// Shorthand for a relay failure without an HTTP status.
    pub fn relay(message: impl Into<String>) -> Self {
        Self::Relay {
            status: None,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(RecorderError::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(RecorderError::SessionNotFound("cam".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            RecorderError::StorageBlocked { usage_percent: 95.0 }.kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(RecorderError::TooManySessions(4).kind(), ErrorKind::ResourceExhausted);
        assert_eq!(RecorderError::LaunchFailed("no such file".into()).kind(), ErrorKind::ExternalFailure);
        assert_eq!(RecorderError::BreakerOpen.kind(), ErrorKind::BreakerOpen);
    }

    #[test]
    fn client_errors_are_terminal() {
        let bad_request = RecorderError::Relay {
            status: Some(404),
            message: "no such path".into(),
        };
        assert!(!bad_request.is_retryable());

        let throttled = RecorderError::Relay {
            status: Some(429),
            message: "slow down".into(),
        };
        assert!(throttled.is_retryable());

        let unavailable = RecorderError::Relay {
            status: Some(503),
            message: "unavailable".into(),
        };
        assert!(unavailable.is_retryable());

        assert!(RecorderError::relay("connection refused").is_retryable());
        assert!(!RecorderError::Validation("empty".into()).is_retryable());
    }

    #[test]
    fn relay_message_includes_status() {
        let err = RecorderError::Relay {
            status: Some(502),
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "relay request failed with status 502: bad gateway");
        assert_eq!(
            RecorderError::relay("refused").to_string(),
            "relay request failed: refused"
        );
    }
}
