//! In-memory key-value storage owned by a node.
//!
//! The node never reaches for global state: it receives an `Arc<dyn KeyValueStore>`
//! at construction time, so tests can hand in their own store and inspect it
//! after driving the wire protocol.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Atomic single-key operations every node store must provide.
///
/// Each call is expected to complete without blocking on anything other than
/// the store's own lock. Callers rely on that to keep lock hold times short and
/// to never hold the store across network I/O.
pub trait KeyValueStore: Send + Sync {
    /// Returns the current value for `key`, or `None` if it is absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Inserts or overwrites `key`.
    fn set(&self, key: String, value: String);

    /// Removes `key`, returning the value it held. Removing an absent key is a no-op.
    fn delete(&self, key: &str) -> Option<String>;

    /// Number of entries currently stored.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every entry into a sorted map.
    ///
    /// The copy is taken under the lock and returned so callers can iterate
    /// without holding it.
    fn snapshot(&self) -> BTreeMap<String, String>;
}

/// `HashMap` behind one coarse `Mutex`.
///
/// Every operation is a single map call under the lock, so no reader can see a
/// half-applied write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic elsewhere cannot leave the map half-written, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: String, value: String) {
        self.lock().insert(key, value);
    }

    fn delete(&self, key: &str) -> Option<String> {
        self.lock().remove(key)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
