use crate::handler::AssetTypeRegistry;
use atelier_common::AssetConfig;
use atelier_storage::{AssetStorage, ReadOnlyStorage};
use futures::task::LocalSpawn;
use std::rc::Rc;

/// Collaborators shared by every record and load graph of a project.
#[derive(Clone)]
pub struct AssetContext {
    pub storage: Rc<dyn AssetStorage>,
    /// Packaged assets. Always read-only.
    pub built_in_storage: Option<Rc<dyn AssetStorage>>,
    pub registry: Rc<AssetTypeRegistry>,
    pub config: AssetConfig,
    /// Executor that nested dependency loads are spawned on.
    pub spawner: Rc<dyn LocalSpawn>,
}

impl AssetContext {
    pub fn new(
        storage: impl AssetStorage + 'static,
        registry: AssetTypeRegistry,
        spawner: impl LocalSpawn + 'static,
    ) -> Self {
        Self {
            storage: Rc::new(storage),
            built_in_storage: None,
            registry: Rc::new(registry),
            config: AssetConfig::default(),
            spawner: Rc::new(spawner),
        }
    }

    /// Attach storage for built-in assets. It is wrapped so writes fail.
    pub fn with_built_in_storage(mut self, storage: impl AssetStorage + 'static) -> Self {
        self.built_in_storage = Some(Rc::new(ReadOnlyStorage::new(storage)));
        self
    }

    pub fn with_config(mut self, config: AssetConfig) -> Self {
        self.config = config;
        self
    }
}
