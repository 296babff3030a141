use atelier_common::AssetId;
use atelier_storage::StorageError;

/// Errors from asset operations.
///
/// Cloneable because one in-flight load hands its result to every caller
/// that joined it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssetError {
    #[error("could not determine the asset type of {id}")]
    TypeResolutionFailure { id: AssetId },
    #[error("no handler registered for asset type {type_id:?} (asset {id})")]
    UnknownAssetType { id: AssetId, type_id: String },
    #[error("failed to read asset {id}: {source}")]
    ReadFailure {
        id: AssetId,
        #[source]
        source: StorageError,
    },
    #[error("failed to parse asset {id}: {message}")]
    Parse { id: AssetId, message: String },
    #[error("assertion failed: {0}")]
    AssertionFailure(String),
    #[error("asset {0} has been destroyed")]
    Destroyed(AssetId),
    #[error("load of asset {id} was discarded by concurrent destroys {attempts} times")]
    StaleRetriesExhausted { id: AssetId, attempts: u32 },
    #[error("asset not found: {0}")]
    RecordNotFound(AssetId),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Error returned by an [`AssetTypeHandler`](crate::AssetTypeHandler) that
/// cannot make sense of its raw data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(pub String);

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for ParseError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self(err.to_string())
    }
}
