use crate::models::storage::StorageSnapshot;

use super::{AlertCondition, AlertSeverity, STORAGE_CRITICAL, STORAGE_WARNING};

/// Conditions raised by one storage snapshot, most severe first.
///
/// Block implies warn, but only the critical condition is reported then.
pub fn evaluate_storage(snapshot: &StorageSnapshot) -> Vec<AlertCondition> {
    if snapshot.block {
        vec![AlertCondition {
            name: STORAGE_CRITICAL.to_string(),
            severity: AlertSeverity::Critical,
            message: format!(
                "storage at {:.1}% ({} bytes free), new recordings are blocked",
                snapshot.usage_percent, snapshot.available_bytes
            ),
        }]
    } else if snapshot.warn {
        vec![AlertCondition {
            name: STORAGE_WARNING.to_string(),
            severity: AlertSeverity::Warning,
            message: format!(
                "storage at {:.1}% ({} bytes free)",
                snapshot.usage_percent, snapshot.available_bytes
            ),
        }]
    } else {
        Vec::new()
    }
}
