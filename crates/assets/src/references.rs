//! Transitive traversal of asset references without loading live assets.

use crate::catalog::AssetCatalog;
use crate::error::AssetError;
use atelier_common::AssetId;
use futures::Stream;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Lazily yields every id transitively referenced by a root asset, each once,
/// in breadth-first order. The root itself is not yielded unless something it
/// references points back at it.
///
/// Referenced ids without a record are yielded but not expanded.
pub struct ReferenceWalker {
    catalog: AssetCatalog,
    root: AssetId,
    queue: VecDeque<AssetId>,
    visited: HashSet<AssetId>,
    expanded_root: bool,
}

impl ReferenceWalker {
    pub fn new(catalog: AssetCatalog, root: AssetId) -> Self {
        let mut walker = Self {
            catalog,
            root,
            queue: VecDeque::new(),
            visited: HashSet::new(),
            expanded_root: false,
        };
        walker.restart();
        walker
    }

    pub fn root(&self) -> AssetId {
        self.root
    }

    /// Start over from the root, rereading stored data as it is reached.
    pub fn restart(&mut self) {
        self.queue.clear();
        self.visited.clear();
        self.expanded_root = false;
    }

    pub async fn next(&mut self) -> Option<AssetId> {
        if !self.expanded_root {
            self.expanded_root = true;
            self.expand(self.root).await;
        }
        let id = self.queue.pop_front()?;
        if id != self.root {
            self.expand(id).await;
        }
        Some(id)
    }

    /// Drain the remaining ids.
    pub async fn collect_all(mut self) -> Vec<AssetId> {
        let mut ids = Vec::new();
        while let Some(id) = self.next().await {
            ids.push(id);
        }
        ids
    }

    pub fn into_stream(self) -> impl Stream<Item = AssetId> {
        futures::stream::unfold(self, |mut walker| async move {
            let id = walker.next().await?;
            Some((id, walker))
        })
    }

    async fn expand(&mut self, id: AssetId) {
        match self.direct_references(id).await {
            Ok(references) => {
                for reference in references {
                    if self.visited.insert(reference) {
                        self.queue.push_back(reference);
                    }
                }
            }
            Err(err) => warn!(id = %id, error = %err, "skipping references of unreadable asset"),
        }
    }

    async fn direct_references(&self, id: AssetId) -> Result<Vec<AssetId>, AssetError> {
        let Some(record) = self.catalog.get_record(id) else {
            debug!(id = %id, "referenced asset has no record");
            return Ok(Vec::new());
        };
        if record.resolve_type().await.is_none() {
            return Err(AssetError::TypeResolutionFailure { id });
        }
        let type_id = record
            .asset_type_id()
            .ok_or(AssetError::TypeResolutionFailure { id })?;
        let handler = self
            .catalog
            .context()
            .registry
            .get(&type_id)
            .ok_or(AssetError::UnknownAssetType { id, type_id })?;
        let raw = record.read_raw_as(handler.storage_format()).await?;
        Ok(handler.referenced_ids(&raw))
    }
}
