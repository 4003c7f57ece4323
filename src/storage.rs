//! Persistence of received files.
//!
//! Provides:
//! - `FileStore`: the interface the session handler writes through
//! - `DirectoryStore`: one file per upload under a root directory
//! - `MemoryStore`: thread-safe in-memory map, for tests and embedding

use crate::error::StoreError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

/// Destination for received payloads.
///
/// `store` is synchronous; the reply digest is not sent until it returns.
/// Storing under an existing name overwrites it.
pub trait FileStore: Send + Sync {
    fn store(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;
}

/// Reject names that would escape the store's root.
fn validate_name(name: &str) -> Result<(), StoreError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StoreError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// Stores each upload as `root/<name>`.
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Create the store, creating `root` if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        info!(root = %root.display(), "Initializing file store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a file named `name` is stored at.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

impl FileStore for DirectoryStore {
    fn store(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        fs::write(&path, data).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), bytes = data.len(), "File written");
        Ok(())
    }
}

/// Keeps uploads in memory, keyed by name.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents stored under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileStore for MemoryStore {
    fn store(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_name(name)?;
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_store_writes_file() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path().join("received_files")).unwrap();

        store.store("a.txt", b"hello").unwrap();

        let written = fs::read(store.root().join("a.txt")).unwrap();
        assert_eq!(written, b"hello");
    }

    #[test]
    fn test_directory_store_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path()).unwrap();

        store.store("a.txt", b"first version").unwrap();
        store.store("a.txt", b"second").unwrap();

        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"second");
    }

    #[test]
    fn test_directory_store_empty_payload() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path()).unwrap();

        store.store("empty.bin", b"").unwrap();
        assert_eq!(fs::metadata(dir.path().join("empty.bin")).unwrap().len(), 0);
    }

    #[test]
    fn test_rejects_escaping_names() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path().join("inner")).unwrap();

        for name in ["", ".", "..", "../escape.txt", "sub/file.txt", "back\\slash"] {
            match store.store(name, b"x") {
                Err(StoreError::InvalidName(n)) => assert_eq!(n, name),
                other => panic!("{name:?}: unexpected {other:?}"),
            }
        }
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path().join("gone")).unwrap();
        fs::remove_dir(store.root()).unwrap();

        assert!(matches!(
            store.store("a.txt", b"x"),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.store("a.txt", b"hello").unwrap();
        store.store("a.txt", b"world").unwrap();
        store.store("b.txt", b"").unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a.txt").unwrap(), b"world");
        assert_eq!(store.get("b.txt").unwrap(), b"");
        assert!(store.get("c.txt").is_none());
        assert!(store.store("../x", b"").is_err());
    }
}
