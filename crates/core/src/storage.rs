//! Durable key/value storage for the test harness.
//!
//! The test patient collection is persisted as one JSON string under a fixed key. Two
//! backends are provided:
//!
//! - [`FileKeyValueStore`]: one `<key>.json` file per key under a storage directory,
//!   replaced atomically (write to a temporary file, then rename);
//! - [`MemoryKeyValueStore`]: an in-process map, for tests and throwaway sessions.
//!
//! ## Storage Layout
//!
//! ```text
//! concept_data/
//!   testPatients.json
//! ```

use crate::config::validate_storage_key;
use crate::{ConceptError, ConceptResult};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub trait KeyValueStore: Send + Sync {
    /// Returns `Ok(None)` when nothing is stored under `key`.
    fn get(&self, key: &str) -> ConceptResult<Option<String>>;

    /// Replaces whatever is stored under `key`.
    fn set(&self, key: &str, value: &str) -> ConceptResult<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> ConceptResult<()>;
}

#[derive(Clone, Debug)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// The directory is created lazily on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> ConceptResult<PathBuf> {
        validate_storage_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> ConceptResult<Option<String>> {
        let path = self.entry_path(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConceptError::StorageRead(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> ConceptResult<()> {
        let path = self.entry_path(key)?;
        fs::create_dir_all(&self.dir).map_err(ConceptError::StorageDirCreation)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(ConceptError::StorageWrite)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(ConceptError::StorageWrite(e));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> ConceptResult<()> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConceptError::StorageWrite(e)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> ConceptResult<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> ConceptResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ConceptResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_missing_key_is_none() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(temp.path().join("data"));

        assert!(store.get("testPatients").unwrap().is_none());
    }

    #[test]
    fn test_file_store_set_then_get() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(temp.path().join("data"));

        store.set("testPatients", "[1]").unwrap();
        store.set("testPatients", "[2]").unwrap();

        assert_eq!(store.get("testPatients").unwrap().as_deref(), Some("[2]"));
        assert!(temp.path().join("data/testPatients.json").is_file());
        assert!(!temp.path().join("data/testPatients.json.tmp").exists());
    }

    #[test]
    fn test_file_store_remove() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(temp.path());

        store.set("k", "v").unwrap();
        store.remove("k").unwrap();
        store.remove("k").unwrap();

        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_file_store_rejects_unsafe_keys() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(temp.path());

        assert!(matches!(
            store.set("../outside", "x"),
            Err(ConceptError::InvalidInput(_))
        ));
        assert!(matches!(
            store.get(""),
            Err(ConceptError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_file_store_unwritable_dir_errors() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let store = FileKeyValueStore::new(blocker.join("nested"));

        assert!(matches!(
            store.set("k", "v"),
            Err(ConceptError::StorageDirCreation(_))
        ));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryKeyValueStore::new();

        assert!(store.get("k").unwrap().is_none());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }
}
