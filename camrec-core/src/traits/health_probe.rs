use async_trait::async_trait;

use crate::models::error::RecorderError;

/// Reachability check against the downstream media relay.
///
/// Supplied by the relay management client; the engine does not know the
/// wire protocol. Implementations should return `RecorderError::Relay` on
/// failure so the retry layer can classify it.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<(), RecorderError>;
}
