//! Last-emitted snapshot per feed key.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Remembers the last value emitted for each key and tells whether a new
/// value differs from it (value equality).
pub struct ChangeDetector<T> {
    last: Mutex<HashMap<String, T>>,
}

impl<T> Default for ChangeDetector<T> {
    fn default() -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: PartialEq + Clone> ChangeDetector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` if it differs from the stored one (or nothing is stored
    /// yet). Returns `true` when it was stored, i.e. when it must be emitted.
    pub fn observe(&self, key: &str, value: T) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match last.get(key) {
            Some(previous) if *previous == value => false,
            _ => {
                last.insert(key.to_string(), value);
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.get(key).cloned()
    }

    pub fn evict(&self, key: &str) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_is_a_change() {
        let detector = ChangeDetector::new();
        assert!(detector.observe("alice", "Song A".to_string()));
        assert_eq!(detector.get("alice").as_deref(), Some("Song A"));
    }

    #[test]
    fn test_equal_values_are_not_changes() {
        let detector = ChangeDetector::new();
        assert!(detector.observe("alice", vec![1, 2, 3]));
        assert!(!detector.observe("alice", vec![1, 2, 3]));
        assert!(detector.observe("alice", vec![1, 2, 4]));
        assert_eq!(detector.get("alice"), Some(vec![1, 2, 4]));
    }

    #[test]
    fn test_evict_forgets_value() {
        let detector = ChangeDetector::new();
        detector.observe("alice", 1u8);
        detector.observe("bob", 1u8);
        assert!(detector.evict("alice"));
        assert!(!detector.evict("alice"));
        assert_eq!(detector.len(), 1);
        // After eviction the same value counts as new again.
        assert!(detector.observe("alice", 1u8));
    }
}
