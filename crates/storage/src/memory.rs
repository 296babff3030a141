use crate::{AssetStorage, StorageError};
use async_trait::async_trait;
use atelier_common::AssetPath;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

/// In-memory storage, used for tests and for scratch projects.
///
/// Counts reads per path so callers can check how often data was fetched.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RefCell<BTreeMap<AssetPath, Vec<u8>>>,
    reads: RefCell<HashMap<AssetPath, usize>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` at `path` without going through the async interface.
    pub fn insert(&self, path: impl Into<AssetPath>, data: impl Into<Vec<u8>>) {
        self.files.borrow_mut().insert(path.into(), data.into());
    }

    /// Store a JSON value at `path`.
    pub fn insert_json(&self, path: impl Into<AssetPath>, value: &serde_json::Value) {
        // Serializing a `Value` cannot fail.
        let bytes = serde_json::to_vec_pretty(value).unwrap_or_default();
        self.insert(path, bytes);
    }

    /// Current contents at `path`.
    pub fn get(&self, path: &AssetPath) -> Option<Vec<u8>> {
        self.files.borrow().get(path).cloned()
    }

    /// Current contents at `path`, parsed as JSON.
    pub fn get_json(&self, path: &AssetPath) -> Option<serde_json::Value> {
        self.get(path)
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    pub fn remove(&self, path: &AssetPath) -> Option<Vec<u8>> {
        self.files.borrow_mut().remove(path)
    }

    /// Number of reads issued for `path` so far, successful or not.
    pub fn read_count(&self, path: &AssetPath) -> usize {
        self.reads.borrow().get(path).copied().unwrap_or(0)
    }

    pub fn paths(&self) -> Vec<AssetPath> {
        self.files.borrow().keys().cloned().collect()
    }
}

#[async_trait(?Send)]
impl AssetStorage for MemoryStorage {
    async fn read(&self, path: &AssetPath) -> Result<Vec<u8>, StorageError> {
        *self.reads.borrow_mut().entry(path.clone()).or_default() += 1;
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.clone()))
    }

    async fn write(&self, path: &AssetPath, data: Vec<u8>) -> Result<(), StorageError> {
        self.files.borrow_mut().insert(path.clone(), data);
        Ok(())
    }

    async fn exists(&self, path: &AssetPath) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn write_then_read() {
        let storage = MemoryStorage::new();
        let path = AssetPath::new("a.txt");
        block_on(storage.write(&path, b"hello".to_vec())).unwrap();
        assert!(block_on(storage.exists(&path)));
        assert_eq!(block_on(storage.read(&path)).unwrap(), b"hello");
        assert_eq!(storage.read_count(&path), 1);
    }

    #[test]
    fn missing_path_is_not_found() {
        let storage = MemoryStorage::new();
        let path = AssetPath::new("missing.json");
        let err = block_on(storage.read(&path)).unwrap_err();
        assert_eq!(err, StorageError::NotFound(path.clone()));
        assert_eq!(storage.read_count(&path), 1);
    }

    #[test]
    fn json_helpers() {
        let storage = MemoryStorage::new();
        let value = serde_json::json!({ "ref": null });
        storage.insert_json("a.json", &value);
        assert_eq!(storage.get_json(&AssetPath::new("a.json")), Some(value));
    }
}
