//! Storage Trait
//!
//! This module defines the `Storage` trait, the key-addressed persistence
//! interface the capture pipeline hands finished archives to.
//!
//! Implementors must be safe to share between connections: `store` is called
//! concurrently from many archival jobs, each with a distinct key.

use crate::error_handling::types::StorageError;

/// Key-addressed persistent store.
pub trait Storage: Send + Sync {
    /// Persists `bytes` under `key`, replacing any previous value.
    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Retrieves the value stored under `key`.
    fn load(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Reports whether `key` holds a value.
    fn exists(&self, key: &str) -> bool {
        self.load(key).is_ok()
    }

    /// Lists stored keys, sorted.
    fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// Keys are single, non-hidden path components so every backend can map them
/// to a flat namespace.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0'])
        || key.chars().any(char::is_control);
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_archive_keys() {
        assert!(validate_key("6f1c1c2e-2a55-4ac9-9d52-8c3e0f0b8f6d.warc").is_ok());
    }

    #[test]
    fn rejects_path_like_keys() {
        for key in ["", "..", ".hidden", "a/b", "a\\b", "nul\0", "line\nbreak"] {
            assert!(
                matches!(validate_key(key), Err(StorageError::InvalidKey(_))),
                "{:?} should be rejected",
                key
            );
        }
    }
}
