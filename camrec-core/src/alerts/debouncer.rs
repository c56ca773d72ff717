use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::AlertCondition;

/// Suppresses repeat notifications of the same condition within a cooldown.
///
/// Keyed by condition name. A condition that stops holding is forgotten, so
/// it notifies immediately the next time it fires.
pub struct AlertDebouncer {
    cooldown: Duration,
    last_notified: Mutex<HashMap<String, Instant>>,
}

impl AlertDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_notified: Mutex::new(HashMap::new()),
        }
    }

    /// Filter `conditions` down to those due for notification now.
    pub fn filter(&self, conditions: Vec<AlertCondition>) -> Vec<AlertCondition> {
        self.filter_at(conditions, Instant::now())
    }

    pub(crate) fn filter_at(&self, conditions: Vec<AlertCondition>, now: Instant) -> Vec<AlertCondition> {
        let mut last = self.last_notified.lock();
        last.retain(|name, _| conditions.iter().any(|c| &c.name == name));

        conditions
            .into_iter()
            .filter(|condition| match last.get(&condition.name) {
                Some(at) if now.saturating_duration_since(*at) < self.cooldown => {
                    log::debug!("alert {} suppressed by cooldown", condition.name);
                    false
                }
                _ => {
                    last.insert(condition.name.clone(), now);
                    true
                }
            })
            .collect()
    }
}
