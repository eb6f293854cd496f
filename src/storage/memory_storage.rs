use std::collections::BTreeMap;
use std::sync::Mutex;

use log::debug;

use super::storage_trait::{validate_key, Storage};
use crate::error_handling::types::StorageError;

/// In-process storage backed by a sorted map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut objects = self
            .objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        objects.insert(key.to_string(), bytes.to_vec());
        debug!("Stored {} byte(s) under {}", bytes.len(), key);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let objects = self
            .objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_load() {
        let storage = MemoryStorage::new();
        storage.store("a.warc", b"one").unwrap();
        storage.store("a.warc", b"two").unwrap();
        storage.store("b.warc", b"").unwrap();

        assert_eq!(storage.load("a.warc").unwrap(), b"two");
        assert_eq!(storage.load("b.warc").unwrap(), b"");
        assert!(storage.exists("b.warc"));
        assert_eq!(storage.list().unwrap(), vec!["a.warc", "b.warc"]);
        assert!(matches!(storage.load("c.warc"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn invalid_keys_are_not_stored() {
        let storage = MemoryStorage::new();
        assert!(storage.store("../x", b"x").is_err());
        assert!(storage.is_empty());
    }
}
