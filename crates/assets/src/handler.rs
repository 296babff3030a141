//! Asset type handlers and the registry that maps type ids to them.

use crate::error::{AssetError, ParseError};
use crate::graph::LoadGraph;
use atelier_common::AssetId;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// The fully constructed in-memory object produced from an asset's data.
pub type LiveAsset = Rc<dyn Any>;

/// Editor-side data a handler keeps next to a live asset.
pub type AuxiliaryData = Rc<dyn Any>;

/// What a load resolves to. Both fields are `None` for an empty result
/// (failed or destroyed asset).
#[derive(Clone, Default)]
pub struct LiveAssetData {
    pub live_asset: Option<LiveAsset>,
    pub auxiliary_data: Option<AuxiliaryData>,
}

impl LiveAssetData {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.live_asset.is_none()
    }

    /// The live asset downcast to its concrete type.
    pub fn live_asset_as<T: 'static>(&self) -> Option<Rc<T>> {
        self.live_asset.clone()?.downcast::<T>().ok()
    }

    pub fn auxiliary_data_as<T: 'static>(&self) -> Option<Rc<T>> {
        self.auxiliary_data.clone()?.downcast::<T>().ok()
    }

    /// Whether both results hold the very same live asset instance.
    pub fn same_live_asset(&self, other: &Self) -> bool {
        match (&self.live_asset, &other.live_asset) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for LiveAssetData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveAssetData")
            .field("live_asset", &self.live_asset.as_ref().map(Rc::as_ptr))
            .field("auxiliary_data", &self.auxiliary_data.is_some())
            .finish()
    }
}

impl From<ParsedAsset> for LiveAssetData {
    fn from(parsed: ParsedAsset) -> Self {
        Self {
            live_asset: Some(parsed.live_asset),
            auxiliary_data: parsed.auxiliary_data,
        }
    }
}

/// Successful output of [`AssetTypeHandler::parse_data`].
pub struct ParsedAsset {
    pub live_asset: LiveAsset,
    pub auxiliary_data: Option<AuxiliaryData>,
}

impl ParsedAsset {
    pub fn new<T: 'static>(live_asset: T) -> Self {
        Self::from_rc(Rc::new(live_asset))
    }

    /// Wrap an already shared live asset, e.g. one the handler keeps a
    /// reference to for late-bound fields.
    pub fn from_rc<T: 'static>(live_asset: Rc<T>) -> Self {
        Self {
            live_asset,
            auxiliary_data: None,
        }
    }

    pub fn with_auxiliary_data<A: 'static>(mut self, data: A) -> Self {
        self.auxiliary_data = Some(Rc::new(data));
        self
    }
}

/// How stored bytes are interpreted before they reach the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    Json,
    Text,
    Binary,
}

/// Stored data decoded according to a [`StorageFormat`].
#[derive(Debug, Clone, PartialEq)]
pub enum RawData {
    Json(serde_json::Value),
    Text(String),
    Binary(Vec<u8>),
}

impl RawData {
    pub fn decode(format: StorageFormat, bytes: Vec<u8>) -> Result<Self, ParseError> {
        Ok(match format {
            StorageFormat::Json => Self::Json(serde_json::from_slice(&bytes)?),
            StorageFormat::Text => Self::Text(String::from_utf8(bytes)?),
            StorageFormat::Binary => Self::Binary(bytes),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            // Serializing a `Value` cannot fail.
            Self::Json(value) => serde_json::to_vec_pretty(value).unwrap_or_default(),
            Self::Text(text) => text.clone().into_bytes(),
            Self::Binary(bytes) => bytes.clone(),
        }
    }

    pub fn format(&self) -> StorageFormat {
        match self {
            Self::Json(_) => StorageFormat::Json,
            Self::Text(_) => StorageFormat::Text,
            Self::Binary(_) => StorageFormat::Binary,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Plugin contract for one asset type.
///
/// Parsing is synchronous: a handler that needs other assets asks the
/// [`LoadGraph`] for them and receives them through callbacks, possibly after
/// `parse_data` has returned.
pub trait AssetTypeHandler {
    /// Registry key, e.g. `"material"`.
    fn asset_type_id(&self) -> &str;

    /// File extensions (lowercase, without the dot) this type claims.
    fn extensions(&self) -> &[&'static str] {
        &[]
    }

    fn storage_format(&self) -> StorageFormat;

    fn parse_data(&self, raw: RawData, graph: &LoadGraph) -> Result<ParsedAsset, ParseError>;

    /// Tear down a live asset previously produced by `parse_data`.
    fn destroy(&self, _live_asset: &LiveAsset, _auxiliary_data: Option<&AuxiliaryData>) {}

    /// Ids of other assets `raw` refers to.
    fn referenced_ids(&self, _raw: &RawData) -> Vec<AssetId> {
        Vec::new()
    }

    /// Binary encoding of `raw` for bundling, if this type has one.
    fn create_bundled_data(&self, _raw: &RawData) -> Option<Vec<u8>> {
        None
    }
}

/// Maps asset type ids and file extensions to handlers.
#[derive(Default)]
pub struct AssetTypeRegistry {
    handlers: HashMap<String, Rc<dyn AssetTypeHandler>>,
    by_extension: HashMap<String, Vec<String>>,
}

impl AssetTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Type ids must be unique.
    pub fn register<H: AssetTypeHandler + 'static>(&mut self, handler: H) -> Result<(), AssetError> {
        let type_id = handler.asset_type_id().to_owned();
        if self.handlers.contains_key(&type_id) {
            return Err(AssetError::AssertionFailure(format!(
                "asset type {type_id:?} is already registered"
            )));
        }
        for ext in handler.extensions() {
            self.by_extension
                .entry(ext.to_ascii_lowercase())
                .or_default()
                .push(type_id.clone());
        }
        tracing::debug!(type_id = %type_id, "registered asset type");
        self.handlers.insert(type_id, Rc::new(handler));
        Ok(())
    }

    pub fn get(&self, type_id: &str) -> Option<Rc<dyn AssetTypeHandler>> {
        self.handlers.get(type_id).cloned()
    }

    /// The type claiming `extension`, if exactly one type claims it.
    ///
    /// Extensions shared by several types (typically `json`) are ambiguous and
    /// need the payload's type tag instead.
    pub fn type_for_extension(&self, extension: &str) -> Option<&str> {
        match self.by_extension.get(&extension.to_ascii_lowercase())?.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    pub fn type_ids(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
