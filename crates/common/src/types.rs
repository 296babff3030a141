use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an asset record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub Uuid);

impl AssetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id for a packaged asset, derived from its path.
    ///
    /// Built-in assets ship with the editor and have no settings file to
    /// remember a random id in, so the id is the first 16 bytes of the
    /// SHA-256 of the normalized path.
    pub fn for_built_in(path: &AssetPath) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"atelier-built-in:");
        hasher.update(path.as_str().as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AssetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Location of an asset's backing data, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AssetPath(String);

impl AssetPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path
            .as_ref()
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect::<Vec<_>>()
            .join("/");
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, e.g. `["materials", "floor.json"]`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|name| !name.is_empty())
    }

    /// Lowercased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AssetPath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for AssetPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<AssetPath> for String {
    fn from(value: AssetPath) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_id_uniqueness() {
        let a = AssetId::new();
        let b = AssetId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn built_in_ids_are_stable() {
        let path = AssetPath::new("shaders/default.json");
        assert_eq!(AssetId::for_built_in(&path), AssetId::for_built_in(&path));
        assert_ne!(
            AssetId::for_built_in(&path),
            AssetId::for_built_in(&AssetPath::new("shaders/other.json"))
        );
    }

    #[test]
    fn asset_id_parses_display_output() {
        let id = AssetId::new();
        let parsed: AssetId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn path_is_normalized() {
        let path = AssetPath::new("/materials\\./floor.JSON");
        assert_eq!(path.as_str(), "materials/floor.JSON");
        assert_eq!(path.file_name(), Some("floor.JSON"));
        assert_eq!(path.extension().as_deref(), Some("json"));
    }

    #[test]
    fn dotfiles_have_no_extension() {
        assert_eq!(AssetPath::new(".gitignore").extension(), None);
        assert_eq!(AssetPath::new("README").extension(), None);
    }
}
