use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use uuid::Uuid;

use super::storage_trait::{validate_key, Storage};
use crate::error_handling::types::StorageError;

/// Filesystem storage: each key is one file directly under `base_path`.
///
/// Writes go to a hidden temporary file that is renamed into place, so a
/// reader never observes a partially written archive.
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| {
            error!("Failed to create storage dir {}: {}", base_path.display(), e);
            StorageError::WriteFailed(e)
        })?;
        info!("FileStorage initialized at {}", base_path.display());
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }
}

impl Storage for FileStorage {
    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        let tmp = self
            .base_path
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));

        let written = File::create(&tmp).and_then(|mut f| {
            f.write_all(bytes)?;
            f.sync_all()
        });
        if let Err(e) = written {
            error!("Write failed {}: {}", tmp.display(), e);
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::WriteFailed(e));
        }
        fs::rename(&tmp, &path).map_err(|e| {
            error!("Rename failed {} -> {}: {}", tmp.display(), path.display(), e);
            let _ = fs::remove_file(&tmp);
            StorageError::WriteFailed(e)
        })?;

        debug!("Wrote {} byte(s) to {}", bytes.len(), path.display());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        match fs::read(&path) {
            Ok(buf) => {
                debug!("Read {} byte(s) from {}", buf.len(), path.display());
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => {
                error!("Read failed {}: {}", path.display(), e);
                Err(StorageError::ReadFailed(e))
            }
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.object_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            error!("Failed to read storage dir {}: {}", self.base_path.display(), e);
            StorageError::ReadFailed(e)
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                error!("Dir entry error: {}", e);
                StorageError::ReadFailed(e)
            })?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_key(name).is_ok() {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_load() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.store("one.warc", b"WARC/1.0\r\n").unwrap();
        storage.store("one.warc", b"replaced").unwrap();
        storage.store("two.warc", b"").unwrap();

        assert_eq!(storage.load("one.warc").unwrap(), b"replaced");
        assert_eq!(storage.load("two.warc").unwrap(), b"");
        assert!(storage.exists("two.warc"));
        assert!(!storage.exists("three.warc"));
        assert!(matches!(
            storage.load("three.warc"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_skips_temporary_files() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.store("b.warc", b"b").unwrap();
        storage.store("a.warc", b"a").unwrap();
        fs::write(dir.path().join(".c.warc.123.tmp"), b"partial").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        assert_eq!(storage.list().unwrap(), vec!["a.warc", "b.warc"]);
    }

    #[test]
    fn test_keys_cannot_escape_base_path() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("nested")).unwrap();
        assert!(matches!(
            storage.store("../escape.warc", b"x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(!dir.path().join("escape.warc").exists());
    }

    #[test]
    fn test_creates_missing_base_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let storage = FileStorage::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(storage.base_path(), nested.as_path());
    }
}
