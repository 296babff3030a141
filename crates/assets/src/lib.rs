//! Live-asset resolution for the atelier editor.
//!
//! An [`AssetRecord`] owns the lifecycle of one asset's in-memory
//! representation (its *live asset*). Loading goes through a pluggable
//! [`AssetTypeHandler`]; handlers pull in other assets through a per-request
//! [`LoadGraph`], which deduplicates and joins dependency loads and lets cyclic
//! references complete.
//!
//! # Invariants
//! - At most one load per record is in flight. Concurrent callers share it.
//! - A destroy during a load makes that load stale: its result is destroyed
//!   and never published, and callers retry.
//! - Repeat-on-change subscriptions live exactly as long as the live asset
//!   that was being built when they were made.
//! - Built-in records read from read-only storage.

pub mod broadcast;
pub mod catalog;
pub mod context;
pub mod error;
pub mod graph;
pub mod handler;
pub mod node;
pub mod record;
pub mod references;

pub use broadcast::{ListenerId, Listeners, ReplacementBroadcaster};
pub use catalog::{AssetCatalog, RecordCatalog};
pub use context::AssetContext;
pub use error::{AssetError, ParseError};
pub use graph::{LoadGraph, LoadOptions};
pub use handler::{
    AssetTypeHandler, AssetTypeRegistry, AuxiliaryData, LiveAsset, LiveAssetData, ParsedAsset,
    RawData, StorageFormat,
};
pub use node::LoadNode;
pub use record::{ASSET_TYPE_TAG, AssetRecord, LoadState, RecordDescriptor};
pub use references::ReferenceWalker;

pub fn crate_info() -> &'static str {
    "atelier-assets v0.1.0"
}
