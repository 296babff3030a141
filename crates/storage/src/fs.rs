//! Directory-backed asset storage.
//!
//! Layout inside the project directory:
//! ```text
//! assetSettings.json       - asset ids, paths and stored settings
//! atelier.json             - optional loader configuration
//! <asset path>             - raw asset data, one file per asset
//! ```

use crate::{AssetStorage, StorageError};
use async_trait::async_trait;
use atelier_common::AssetPath;
use std::path::{Path, PathBuf};

/// Storage rooted at a project directory on disk.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Open storage at `path`, creating the directory if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Get the path to the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an asset path to a file below the root.
    pub fn resolve(&self, path: &AssetPath) -> Result<PathBuf, StorageError> {
        if path.as_str().is_empty() || path.segments().any(|segment| segment == "..") {
            return Err(StorageError::InvalidPath(path.clone()));
        }
        Ok(path
            .segments()
            .fold(self.root.clone(), |acc, segment| acc.join(segment)))
    }
}

#[async_trait(?Send)]
impl AssetStorage for FsStorage {
    async fn read(&self, path: &AssetPath) -> Result<Vec<u8>, StorageError> {
        let file = self.resolve(path)?;
        std::fs::read(&file).map_err(|e| StorageError::io(path, e))
    }

    async fn write(&self, path: &AssetPath, data: Vec<u8>) -> Result<(), StorageError> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(path, e))?;
        }
        // Write to a sibling temp file first so a crash never leaves a
        // half-written asset behind.
        let tmp = file.with_extension("atelier-tmp");
        std::fs::write(&tmp, &data).map_err(|e| StorageError::io(path, e))?;
        std::fs::rename(&tmp, &file).map_err(|e| StorageError::io(path, e))?;
        tracing::debug!(path = %path, bytes = data.len(), "wrote asset data");
        Ok(())
    }

    async fn exists(&self, path: &AssetPath) -> bool {
        self.resolve(path).map(|file| file.is_file()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn open_creates_root() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(tmp.path().join("project")).unwrap();
        assert!(storage.root().is_dir());
    }

    #[test]
    fn write_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(tmp.path()).unwrap();
        let path = AssetPath::new("materials/floor.json");

        block_on(storage.write(&path, b"{}".to_vec())).unwrap();

        assert!(tmp.path().join("materials").join("floor.json").is_file());
        assert!(block_on(storage.exists(&path)));
        assert_eq!(block_on(storage.read(&path)).unwrap(), b"{}");
    }

    #[test]
    fn overwrite_replaces_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(tmp.path()).unwrap();
        let path = AssetPath::new("a.txt");

        block_on(storage.write(&path, b"first".to_vec())).unwrap();
        block_on(storage.write(&path, b"second".to_vec())).unwrap();

        assert_eq!(block_on(storage.read(&path)).unwrap(), b"second");
        assert!(!tmp.path().join("a.atelier-tmp").exists());
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(tmp.path()).unwrap();
        let path = AssetPath::new("nope.json");
        assert_eq!(
            block_on(storage.read(&path)).unwrap_err(),
            StorageError::NotFound(path.clone())
        );
        assert!(!block_on(storage.exists(&path)));
    }

    #[test]
    fn parent_segments_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(tmp.path().join("project")).unwrap();
        let path = AssetPath::new("../outside.json");
        assert!(matches!(
            block_on(storage.write(&path, Vec::new())),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(!tmp.path().join("outside.json").exists());
    }
}
