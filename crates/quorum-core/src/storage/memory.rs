use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{Storage, StorageError};

/// In-memory storage implementation for testing and simulation
///
/// All state is wrapped in `Arc<Mutex<>>` to allow Clone and concurrent
/// access; clones share the same map. A poisoned mutex is recovered since every
/// operation leaves the map consistent.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    ///
    /// Useful for debugging and testing.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.lock().keys().filter(|key| key.starts_with(prefix)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_delete() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.save("session/alice", b"state").unwrap();
        assert_eq!(storage.load("session/alice").unwrap(), Some(b"state".to_vec()));

        storage.delete("session/alice").unwrap();
        assert_eq!(storage.load("session/alice").unwrap(), None);

        // Deleting again is a no-op
        storage.delete("session/alice").unwrap();
    }

    #[test]
    fn save_overwrites() {
        let storage = MemoryStorage::new();
        storage.save("k", b"one").unwrap();
        storage.save("k", b"two").unwrap();

        assert_eq!(storage.load("k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn list_keys_filters_by_prefix() {
        let storage = MemoryStorage::new();
        storage.save("session/alice", b"a").unwrap();
        storage.save("session/bob", b"b").unwrap();
        storage.save("group/votes", b"g").unwrap();

        let mut keys = storage.list_keys("session/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session/alice".to_string(), "session/bob".to_string()]);
    }

    #[test]
    fn clones_share_state() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();

        clone.save("k", b"v").unwrap();
        assert_eq!(storage.load("k").unwrap(), Some(b"v".to_vec()));
    }
}
