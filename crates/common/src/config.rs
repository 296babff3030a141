use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a load does when the storage collaborator fails to read an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadFailurePolicy {
    /// Log a warning and resolve the load with an empty result.
    #[default]
    ResolveEmpty,
    /// Return the read error to the caller.
    Propagate,
}

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tunables for live-asset loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub read_failure_policy: ReadFailurePolicy,
    /// How many times a load discarded by a concurrent destroy is retried
    /// before giving up.
    pub max_stale_retries: u32,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            read_failure_policy: ReadFailurePolicy::ResolveEmpty,
            max_stale_retries: 8,
        }
    }
}

impl AssetConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Load a config if the file exists, otherwise return the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
