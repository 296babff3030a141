//! Id-addressed registry of the records of one project.

use crate::context::AssetContext;
use crate::error::AssetError;
use crate::handler::LiveAssetData;
use crate::record::{AssetRecord, RecordDescriptor};
use crate::references::ReferenceWalker;
use atelier_common::{AssetId, AssetPath};
use atelier_storage::{AssetSettingsEntry, AssetSettingsFile};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::{debug, info};

/// Lookup of records by id. Load graphs hold this weakly so a dropped
/// catalog does not keep its records alive.
pub trait RecordCatalog {
    fn get_record(&self, id: AssetId) -> Option<Rc<AssetRecord>>;
}

struct CatalogInner {
    context: AssetContext,
    records: RefCell<HashMap<AssetId, Rc<AssetRecord>>>,
}

impl RecordCatalog for CatalogInner {
    fn get_record(&self, id: AssetId) -> Option<Rc<AssetRecord>> {
        self.records.borrow().get(&id).cloned()
    }
}

/// The records of a project keyed by id. Cheap to clone.
#[derive(Clone)]
pub struct AssetCatalog {
    inner: Rc<CatalogInner>,
}

impl AssetCatalog {
    pub fn new(context: AssetContext) -> Self {
        Self {
            inner: Rc::new(CatalogInner {
                context,
                records: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn context(&self) -> &AssetContext {
        &self.inner.context
    }

    fn weak(&self) -> Weak<dyn RecordCatalog> {
        let weak: Weak<CatalogInner> = Rc::downgrade(&self.inner);
        weak
    }

    /// Create and register a record. An existing record with the same id is
    /// disposed and replaced.
    pub fn create_record(&self, descriptor: RecordDescriptor) -> Rc<AssetRecord> {
        let record = AssetRecord::new(descriptor, self.inner.context.clone(), self.weak());
        self.insert_record(Rc::clone(&record));
        record
    }

    /// Register a project asset stored at `path` under a fresh id.
    pub fn add_asset(&self, path: impl Into<AssetPath>) -> Rc<AssetRecord> {
        self.create_record(RecordDescriptor::new(AssetId::new(), path))
    }

    /// Register a packaged asset. Its id is derived from the path, so the same
    /// built-in asset has the same id in every project.
    pub fn create_built_in_record(&self, path: impl Into<AssetPath>) -> Rc<AssetRecord> {
        let path = path.into();
        let id = AssetId::for_built_in(&path);
        self.create_record(RecordDescriptor::new(id, path).built_in())
    }

    fn insert_record(&self, record: Rc<AssetRecord>) {
        let replaced = self
            .inner
            .records
            .borrow_mut()
            .insert(record.id(), record);
        if let Some(old) = replaced {
            debug!(id = %old.id(), "replacing existing asset record");
            old.dispose();
        }
    }

    pub fn get_record(&self, id: AssetId) -> Option<Rc<AssetRecord>> {
        self.inner.get_record(id)
    }

    pub fn get_record_by_path(&self, path: &AssetPath) -> Option<Rc<AssetRecord>> {
        self.inner
            .records
            .borrow()
            .values()
            .find(|record| record.path() == Some(path))
            .cloned()
    }

    /// Load the live asset of `id` as a new root resolution.
    pub async fn get_live_asset_data(&self, id: AssetId) -> Result<LiveAssetData, AssetError> {
        let record = self.get_record(id).ok_or(AssetError::RecordNotFound(id))?;
        record.get_live_asset_data().await
    }

    /// Unregister and dispose a record. Returns false if it was not present.
    pub fn remove_record(&self, id: AssetId) -> bool {
        let removed = self.inner.records.borrow_mut().remove(&id);
        match removed {
            Some(record) => {
                record.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose every record, e.g. when the project closes.
    pub fn dispose(&self) {
        let records: Vec<_> = self.inner.records.borrow_mut().drain().map(|(_, r)| r).collect();
        info!(count = records.len(), "disposing asset catalog");
        for record in records {
            record.dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.borrow().is_empty()
    }

    pub fn ids(&self) -> Vec<AssetId> {
        self.inner.records.borrow().keys().copied().collect()
    }

    /// Register every asset listed in the project's settings file. Returns
    /// the number of records created.
    pub async fn load_settings(&self) -> Result<usize, AssetError> {
        let settings = AssetSettingsFile::load(self.inner.context.storage.as_ref()).await?;
        let count = settings.assets.len();
        for (id, entry) in settings.assets {
            let mut descriptor = RecordDescriptor::new(id, entry.path);
            descriptor.asset_type_id = entry.asset_type;
            descriptor.stored_settings = entry.settings;
            self.create_record(descriptor);
        }
        info!(count, "loaded asset settings");
        Ok(count)
    }

    /// Write the project's settings file from the registered non-built-in
    /// records.
    pub async fn save_settings(&self) -> Result<(), AssetError> {
        let mut settings = AssetSettingsFile::default();
        let records: Vec<_> = self.inner.records.borrow().values().cloned().collect();
        for record in records {
            if record.is_built_in() {
                continue;
            }
            let Some(path) = record.path().cloned() else {
                continue;
            };
            settings.assets.insert(
                record.id(),
                AssetSettingsEntry {
                    path,
                    asset_type: record.asset_type_id(),
                    settings: record.stored_settings(),
                },
            );
        }
        settings.save(self.inner.context.storage.as_ref()).await?;
        debug!(count = settings.assets.len(), "saved asset settings");
        Ok(())
    }

    /// Walk every asset transitively referenced by `root`.
    pub fn referenced_ids(&self, root: AssetId) -> ReferenceWalker {
        ReferenceWalker::new(self.clone(), root)
    }
}

impl RecordCatalog for AssetCatalog {
    fn get_record(&self, id: AssetId) -> Option<Rc<AssetRecord>> {
        self.inner.get_record(id)
    }
}
