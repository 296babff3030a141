//! Storage collaborators: where asset records read and write their raw data.
//!
//! # Invariants
//! - Storage is addressed by [`AssetPath`]; paths never escape the storage root.
//! - Read-only storage rejects every write with [`StorageError::ReadOnly`].
//! - Backends hold raw bytes only. Interpreting them is the asset layer's job.

mod fs;
mod memory;
mod read_only;
mod settings;

pub use fs::FsStorage;
pub use memory::MemoryStorage;
pub use read_only::ReadOnlyStorage;
pub use settings::{ASSET_SETTINGS_PATH, AssetSettingsEntry, AssetSettingsFile};

use async_trait::async_trait;
use atelier_common::AssetPath;

/// Errors from storage operations.
///
/// Cloneable so a single failed read can be reported to every task waiting
/// on the same load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("no data at {0}")]
    NotFound(AssetPath),
    #[error("IO error at {path}: {message}")]
    Io { path: AssetPath, message: String },
    #[error("storage is read-only, cannot write {0}")]
    ReadOnly(AssetPath),
    #[error("path escapes the storage root: {0}")]
    InvalidPath(AssetPath),
    #[error("invalid data at {path}: {message}")]
    InvalidData { path: AssetPath, message: String },
}

impl StorageError {
    pub(crate) fn io(path: &AssetPath, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.clone())
        } else {
            Self::Io {
                path: path.clone(),
                message: err.to_string(),
            }
        }
    }
}

/// Backing store for asset data.
///
/// The asset core runs on a single-threaded executor, so implementations do
/// not need to be `Send`.
#[async_trait(?Send)]
pub trait AssetStorage {
    /// Read the full contents at `path`.
    async fn read(&self, path: &AssetPath) -> Result<Vec<u8>, StorageError>;

    /// Replace the contents at `path`, creating it if needed.
    async fn write(&self, path: &AssetPath, data: Vec<u8>) -> Result<(), StorageError>;

    /// Whether anything is stored at `path`.
    async fn exists(&self, path: &AssetPath) -> bool;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[async_trait(?Send)]
impl<S: AssetStorage + ?Sized> AssetStorage for std::rc::Rc<S> {
    async fn read(&self, path: &AssetPath) -> Result<Vec<u8>, StorageError> {
        (**self).read(path).await
    }

    async fn write(&self, path: &AssetPath, data: Vec<u8>) -> Result<(), StorageError> {
        (**self).write(path, data).await
    }

    async fn exists(&self, path: &AssetPath) -> bool {
        (**self).exists(path).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

pub fn crate_info() -> &'static str {
    "atelier-storage v0.1.0"
}
