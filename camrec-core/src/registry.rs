use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

/// Lock-guarded associative store owned by a single component.
///
/// The lock is taken per call and never escapes, so callers cannot hold it
/// across an `.await` or an external call.
pub struct Registry<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> Registry<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert, returning the value previously stored under `key`.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.entries.lock().insert(key, value)
    }

    /// Insert only when `key` is vacant and `admit` accepts the current
    /// entry count. Check and insert happen under one lock acquisition.
    pub fn try_insert_with<E>(
        &self,
        key: K,
        value: V,
        admit: impl FnOnce(&V, usize) -> Result<(), E>,
        occupied: impl FnOnce(&V) -> E,
    ) -> Result<(), E> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            return Err(occupied(existing));
        }
        admit(&value, entries.len())?;
        entries.insert(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Visit every entry under the lock. `f` must not block.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for (key, value) in self.entries.lock().iter() {
            f(key, value);
        }
    }

    /// First value matching `predicate`.
    pub fn find(&self, mut predicate: impl FnMut(&V) -> bool) -> Option<V> {
        self.entries.lock().values().find(|v| predicate(v)).cloned()
    }

    /// Cloned values, for work that must happen outside the lock.
    pub fn values(&self) -> Vec<V> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> Default for Registry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let registry: Registry<&str, u32> = Registry::new();
        assert!(registry.insert("a", 1).is_none());
        assert_eq!(registry.insert("a", 2), Some(1));
        assert_eq!(registry.get(&"a"), Some(2));
        assert_eq!(registry.remove(&"a"), Some(2));
        assert!(registry.remove(&"a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn try_insert_rejects_occupied_and_over_limit() {
        let registry: Registry<&str, u32> = Registry::new();
        let limit = |_: &u32, len: usize| if len >= 1 { Err("full") } else { Ok(()) };

        registry.try_insert_with("a", 1, limit, |_| "taken").unwrap();
        assert_eq!(registry.try_insert_with("a", 9, limit, |_| "taken"), Err("taken"));
        assert_eq!(registry.try_insert_with("b", 2, limit, |_| "taken"), Err("full"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn find_and_visit() {
        let registry: Registry<u32, String> = Registry::new();
        registry.insert(1, "one!".into());
        registry.insert(2, "two".into());

        assert_eq!(registry.find(|v| v.ends_with('!')), Some("one!".to_string()));
        assert!(registry.find(|v| v.is_empty()).is_none());

        let mut keys = Vec::new();
        registry.for_each(|k, _| keys.push(*k));
        keys.sort();
        assert_eq!(keys, vec![1, 2]);
    }
}
