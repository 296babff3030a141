//! Asset types understood by the CLI.

use atelier_assets::{
    AssetError, AssetTypeHandler, AssetTypeRegistry, LiveAssetData, LoadGraph, LoadOptions,
    ParseError, ParsedAsset, RawData, StorageFormat,
};
use atelier_common::AssetId;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A JSON document that links to other assets by id.
///
/// ```json
/// { "assetType": "document", "title": "Intro", "links": ["<asset id>"] }
/// ```
#[derive(Debug, Default)]
pub struct Document {
    pub title: String,
    /// Summary of each linked asset once it has resolved.
    pub links: RefCell<BTreeMap<AssetId, String>>,
}

#[derive(Deserialize)]
struct DocumentPayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    links: Vec<AssetId>,
}

pub struct DocumentHandler;

impl AssetTypeHandler for DocumentHandler {
    fn asset_type_id(&self) -> &str {
        "document"
    }

    fn extensions(&self) -> &[&'static str] {
        &["doc"]
    }

    fn storage_format(&self) -> StorageFormat {
        StorageFormat::Json
    }

    fn parse_data(&self, raw: RawData, graph: &LoadGraph) -> Result<ParsedAsset, ParseError> {
        let payload = raw
            .as_json()
            .ok_or_else(|| ParseError::new("documents are stored as JSON"))?;
        let payload: DocumentPayload = serde_json::from_value(payload.clone())?;
        let document = Rc::new(Document {
            title: payload.title,
            links: RefCell::default(),
        });
        for id in payload.links {
            let weak = Rc::downgrade(&document);
            graph.get_live_asset_data(
                id,
                move |data| {
                    if let Some(document) = weak.upgrade() {
                        document.links.borrow_mut().insert(id, summarize(data));
                    }
                },
                LoadOptions::repeat_on_change(),
            );
        }
        Ok(ParsedAsset::from_rc(document))
    }

    fn referenced_ids(&self, raw: &RawData) -> Vec<AssetId> {
        raw.as_json()
            .and_then(|payload| serde_json::from_value::<DocumentPayload>(payload.clone()).ok())
            .map(|payload| payload.links)
            .unwrap_or_default()
    }
}

/// Plain text and markdown notes.
pub struct NoteHandler;

impl AssetTypeHandler for NoteHandler {
    fn asset_type_id(&self) -> &str {
        "note"
    }

    fn extensions(&self) -> &[&'static str] {
        &["txt", "md"]
    }

    fn storage_format(&self) -> StorageFormat {
        StorageFormat::Text
    }

    fn parse_data(&self, raw: RawData, _graph: &LoadGraph) -> Result<ParsedAsset, ParseError> {
        let text = raw
            .as_text()
            .ok_or_else(|| ParseError::new("notes are stored as text"))?;
        Ok(ParsedAsset::new(text.to_owned()))
    }

    fn create_bundled_data(&self, raw: &RawData) -> Option<Vec<u8>> {
        raw.as_text().map(|text| text.trim_end().as_bytes().to_vec())
    }
}

pub fn registry() -> Result<AssetTypeRegistry, AssetError> {
    let mut registry = AssetTypeRegistry::new();
    registry.register(DocumentHandler)?;
    registry.register(NoteHandler)?;
    Ok(registry)
}

/// One-line description of a live asset for printing.
pub fn summarize(data: &LiveAssetData) -> String {
    if let Some(document) = data.live_asset_as::<Document>() {
        return format!("document {:?} ({} links)", document.title, document.links.borrow().len());
    }
    if let Some(note) = data.live_asset_as::<String>() {
        let first_line = note.lines().next().unwrap_or_default();
        return format!("note {first_line:?}");
    }
    if data.is_empty() {
        return "<empty>".to_owned();
    }
    "<unknown live asset>".to_owned()
}
