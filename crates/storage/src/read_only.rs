use crate::{AssetStorage, StorageError};
use async_trait::async_trait;
use atelier_common::AssetPath;

/// Read-only view over another storage, used for packaged built-in assets.
#[derive(Debug)]
pub struct ReadOnlyStorage<S> {
    inner: S,
}

impl<S: AssetStorage> ReadOnlyStorage<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait(?Send)]
impl<S: AssetStorage> AssetStorage for ReadOnlyStorage<S> {
    async fn read(&self, path: &AssetPath) -> Result<Vec<u8>, StorageError> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &AssetPath, _data: Vec<u8>) -> Result<(), StorageError> {
        tracing::warn!(path = %path, backend = self.inner.name(), "rejected write to read-only storage");
        Err(StorageError::ReadOnly(path.clone()))
    }

    async fn exists(&self, path: &AssetPath) -> bool {
        self.inner.exists(path).await
    }

    fn name(&self) -> &str {
        "read-only"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use futures::executor::block_on;

    #[test]
    fn reads_pass_through() {
        let memory = MemoryStorage::new();
        memory.insert("builtin/cube.json", b"{}".to_vec());
        let storage = ReadOnlyStorage::new(memory);
        let path = AssetPath::new("builtin/cube.json");

        assert!(block_on(storage.exists(&path)));
        assert_eq!(block_on(storage.read(&path)).unwrap(), b"{}");
    }

    #[test]
    fn writes_are_rejected() {
        let storage = ReadOnlyStorage::new(MemoryStorage::new());
        let path = AssetPath::new("builtin/cube.json");

        let err = block_on(storage.write(&path, b"{}".to_vec())).unwrap_err();
        assert_eq!(err, StorageError::ReadOnly(path.clone()));
        assert!(storage.inner().get(&path).is_none());
    }
}
