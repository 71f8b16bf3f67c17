//! Keyed lock registries.
//!
//! One async mutex per key, created on first use and kept for the life of
//! the registry. The key space is bounded by the number of routes, so
//! entries are never removed.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// A set of mutexes addressed by key.
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Return the mutex for `key`, creating it if this is the first use.
    pub fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(key) {
            return lock.clone();
        }
        self.locks.entry(key.clone()).or_default().clone()
    }

    /// Number of keys seen so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_same_lock() {
        let locks: KeyedLocks<String> = KeyedLocks::new();
        let a = locks.lock_for(&"posts/1".to_string());
        let b = locks.lock_for(&"posts/1".to_string());
        let c = locks.lock_for(&"posts/2".to_string());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_lock_excludes_holders() {
        let locks: KeyedLocks<&'static str> = KeyedLocks::new();
        let lock = locks.lock_for(&"k");
        let _held = lock.lock().await;

        assert!(locks.lock_for(&"k").try_lock().is_err());
        assert!(locks.lock_for(&"other").try_lock().is_ok());
    }
}
