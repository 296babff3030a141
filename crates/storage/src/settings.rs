use crate::{AssetStorage, StorageError};
use atelier_common::{AssetId, AssetPath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a project keeps its asset settings.
pub const ASSET_SETTINGS_PATH: &str = "assetSettings.json";

const SETTINGS_SCHEMA_VERSION: u32 = 1;

/// One asset known to the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSettingsEntry {
    pub path: AssetPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    /// Opaque per-asset settings, handed to the asset record untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
}

/// The project's asset settings file: which ids exist and where they live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSettingsFile {
    pub schema_version: u32,
    #[serde(default)]
    pub assets: BTreeMap<AssetId, AssetSettingsEntry>,
}

impl Default for AssetSettingsFile {
    fn default() -> Self {
        Self {
            schema_version: SETTINGS_SCHEMA_VERSION,
            assets: BTreeMap::new(),
        }
    }
}

impl AssetSettingsFile {
    /// Load the settings file from `storage`, or an empty one if the project
    /// has none yet.
    pub async fn load(storage: &dyn AssetStorage) -> Result<Self, StorageError> {
        let path = AssetPath::new(ASSET_SETTINGS_PATH);
        let bytes = match storage.read(&path).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => return Ok(Self::default()),
            Err(e) => return Err(e),
        };
        let file: Self =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidData {
                path: path.clone(),
                message: e.to_string(),
            })?;
        if file.schema_version != SETTINGS_SCHEMA_VERSION {
            return Err(StorageError::InvalidData {
                path,
                message: format!(
                    "schema version mismatch: file has v{}, expected v{}",
                    file.schema_version, SETTINGS_SCHEMA_VERSION
                ),
            });
        }
        Ok(file)
    }

    pub async fn save(&self, storage: &dyn AssetStorage) -> Result<(), StorageError> {
        let path = AssetPath::new(ASSET_SETTINGS_PATH);
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| StorageError::InvalidData {
            path: path.clone(),
            message: e.to_string(),
        })?;
        storage.write(&path, bytes).await
    }

    /// Add an asset and return its new id.
    pub fn insert(&mut self, entry: AssetSettingsEntry) -> AssetId {
        let id = AssetId::new();
        self.assets.insert(id, entry);
        id
    }

    pub fn find_by_path(&self, path: &AssetPath) -> Option<AssetId> {
        self.assets
            .iter()
            .find(|(_, entry)| &entry.path == path)
            .map(|(id, _)| *id)
    }
}
