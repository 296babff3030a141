//! Shared fixtures: a JSON "node" asset type with references, a storage
//! backend whose reads can be held back, and a catalog wired to both.

#![allow(dead_code)]

use async_trait::async_trait;
use atelier_assets::{
    AssetCatalog, AssetContext, AssetRecord, AssetTypeHandler, AssetTypeRegistry, AuxiliaryData,
    LiveAsset, LiveAssetData, LoadGraph, LoadOptions, ParseError, ParsedAsset, RawData,
    StorageFormat,
};
use atelier_common::{AssetConfig, AssetId, AssetPath};
use atelier_storage::{AssetStorage, MemoryStorage, StorageError};
use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::future::{FutureExt, Shared};
use futures::task::LocalSpawnExt;
use serde::Deserialize;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeSpec {
    name: String,
    refs: Vec<AssetId>,
    repeat: Vec<AssetId>,
    embedded: Vec<String>,
}

/// Live asset of the "node" type.
#[derive(Default)]
pub struct TestNode {
    pub name: String,
    pub refs: RefCell<HashMap<AssetId, Option<Rc<TestNode>>>>,
    /// Number of times any reference callback ran.
    pub deliveries: Cell<u32>,
    pub embedded: RefCell<HashMap<String, Rc<AssetRecord>>>,
    pub embedded_live: RefCell<HashMap<String, Option<Rc<TestNode>>>>,
}

impl TestNode {
    pub fn reference(&self, id: AssetId) -> Option<Rc<TestNode>> {
        self.refs.borrow().get(&id).cloned().flatten()
    }

    pub fn embedded_record(&self, key: &str) -> Rc<AssetRecord> {
        Rc::clone(&self.embedded.borrow()[key])
    }

    pub fn embedded_node(&self, key: &str) -> Option<Rc<TestNode>> {
        self.embedded_live.borrow().get(key).cloned().flatten()
    }
}

#[derive(Default)]
pub struct HandlerStats {
    pub parsed: Cell<u32>,
    pub destroyed: Cell<u32>,
}

pub struct NodeHandler {
    stats: Rc<HandlerStats>,
}

impl NodeHandler {
    fn request(graph: &LoadGraph, node: &Rc<TestNode>, id: AssetId, options: LoadOptions) {
        let weak = Rc::downgrade(node);
        graph.get_live_asset_data(
            id,
            move |data: &LiveAssetData| {
                if let Some(node) = weak.upgrade() {
                    node.refs
                        .borrow_mut()
                        .insert(id, data.live_asset_as::<TestNode>());
                    node.deliveries.set(node.deliveries.get() + 1);
                }
            },
            options,
        );
    }
}

impl AssetTypeHandler for NodeHandler {
    fn asset_type_id(&self) -> &str {
        "node"
    }

    fn extensions(&self) -> &[&'static str] {
        &["node"]
    }

    fn storage_format(&self) -> StorageFormat {
        StorageFormat::Json
    }

    fn parse_data(&self, raw: RawData, graph: &LoadGraph) -> Result<ParsedAsset, ParseError> {
        let RawData::Json(payload) = raw else {
            return Err(ParseError::new("node payloads are JSON"));
        };
        self.stats.parsed.set(self.stats.parsed.get() + 1);
        let spec: NodeSpec = serde_json::from_value(payload.clone())?;
        let node = Rc::new(TestNode {
            name: spec.name,
            ..TestNode::default()
        });
        for id in spec.refs {
            Self::request(graph, &node, id, LoadOptions::default());
        }
        for id in spec.repeat {
            Self::request(graph, &node, id, LoadOptions::repeat_on_change());
        }
        for key in spec.embedded {
            let data = payload
                .get(&key)
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            let weak = Rc::downgrade(&node);
            let slot = key.clone();
            let child = graph
                .get_embedded_live_asset_data("node", &key, data, move |data| {
                    if let Some(node) = weak.upgrade() {
                        node.embedded_live
                            .borrow_mut()
                            .insert(slot, data.live_asset_as::<TestNode>());
                    }
                })
                .map_err(|err| ParseError::new(err.to_string()))?;
            node.embedded.borrow_mut().insert(key, child);
        }
        Ok(ParsedAsset::from_rc(node))
    }

    fn destroy(&self, _live_asset: &LiveAsset, _auxiliary_data: Option<&AuxiliaryData>) {
        self.stats.destroyed.set(self.stats.destroyed.get() + 1);
    }

    fn referenced_ids(&self, raw: &RawData) -> Vec<AssetId> {
        let Some(payload) = raw.as_json() else {
            return Vec::new();
        };
        let spec: NodeSpec = serde_json::from_value(payload.clone()).unwrap_or_default();
        spec.refs.into_iter().chain(spec.repeat).collect()
    }
}

/// Plain text files become their contents.
pub struct TextHandler;

impl AssetTypeHandler for TextHandler {
    fn asset_type_id(&self) -> &str {
        "text"
    }

    fn extensions(&self) -> &[&'static str] {
        &["txt"]
    }

    fn storage_format(&self) -> StorageFormat {
        StorageFormat::Text
    }

    fn parse_data(&self, raw: RawData, _graph: &LoadGraph) -> Result<ParsedAsset, ParseError> {
        let text = raw
            .as_text()
            .ok_or_else(|| ParseError::new("expected text"))?;
        Ok(ParsedAsset::new(text.to_owned()))
    }
}

/// Opaque binary blobs, bundled as-is.
pub struct BlobHandler;

impl AssetTypeHandler for BlobHandler {
    fn asset_type_id(&self) -> &str {
        "blob"
    }

    fn extensions(&self) -> &[&'static str] {
        &["bin"]
    }

    fn storage_format(&self) -> StorageFormat {
        StorageFormat::Binary
    }

    fn parse_data(&self, raw: RawData, _graph: &LoadGraph) -> Result<ParsedAsset, ParseError> {
        match raw {
            RawData::Binary(bytes) => Ok(ParsedAsset::new(bytes)),
            _ => Err(ParseError::new("expected bytes")),
        }
    }
}

type Gate = (Option<oneshot::Sender<()>>, Shared<oneshot::Receiver<()>>);

/// Memory storage whose reads can be held at a gate or made to fail.
#[derive(Default)]
pub struct GatedStorage {
    pub inner: MemoryStorage,
    gates: RefCell<HashMap<AssetPath, Gate>>,
    failing: RefCell<HashSet<AssetPath>>,
}

impl GatedStorage {
    /// Hold reads of `path` until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self, path: &str) {
        let (tx, rx) = oneshot::channel();
        self.gates
            .borrow_mut()
            .insert(AssetPath::new(path), (Some(tx), rx.shared()));
    }

    pub fn open_gate(&self, path: &str) {
        if let Some((Some(tx), _)) = self.gates.borrow_mut().remove(&AssetPath::new(path)) {
            let _ = tx.send(());
        }
    }

    pub fn fail_reads(&self, path: &str) {
        self.failing.borrow_mut().insert(AssetPath::new(path));
    }

    pub fn read_count(&self, path: &str) -> usize {
        self.inner.read_count(&AssetPath::new(path))
    }
}

#[async_trait(?Send)]
impl AssetStorage for GatedStorage {
    async fn read(&self, path: &AssetPath) -> Result<Vec<u8>, StorageError> {
        let gate = self.gates.borrow().get(path).map(|(_, rx)| rx.clone());
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.failing.borrow().contains(path) {
            return Err(StorageError::Io {
                path: path.clone(),
                message: "device not ready".into(),
            });
        }
        self.inner.read(path).await
    }

    async fn write(&self, path: &AssetPath, data: Vec<u8>) -> Result<(), StorageError> {
        self.inner.write(path, data).await
    }

    async fn exists(&self, path: &AssetPath) -> bool {
        self.inner.exists(path).await
    }

    fn name(&self) -> &str {
        "gated-memory"
    }
}

pub struct Harness {
    pub storage: Rc<GatedStorage>,
    pub built_in: Rc<MemoryStorage>,
    pub catalog: AssetCatalog,
    pub stats: Rc<HandlerStats>,
}

impl Harness {
    pub fn new(pool: &LocalPool) -> Self {
        Self::with_config(pool, AssetConfig::default())
    }

    pub fn with_config(pool: &LocalPool, config: AssetConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("atelier_assets=debug")
            .with_test_writer()
            .try_init();

        let storage = Rc::new(GatedStorage::default());
        let built_in = Rc::new(MemoryStorage::new());
        let stats = Rc::new(HandlerStats::default());

        let mut registry = AssetTypeRegistry::new();
        registry
            .register(NodeHandler {
                stats: Rc::clone(&stats),
            })
            .unwrap();
        registry.register(TextHandler).unwrap();
        registry.register(BlobHandler).unwrap();

        let context = AssetContext::new(Rc::clone(&storage), registry, pool.spawner())
            .with_built_in_storage(Rc::clone(&built_in))
            .with_config(config);
        Self {
            storage,
            built_in,
            catalog: AssetCatalog::new(context),
            stats,
        }
    }

    /// Register a record at `path` without writing any data yet.
    pub fn add(&self, path: &str) -> Rc<AssetRecord> {
        self.catalog.add_asset(path)
    }

    pub fn write(&self, record: &AssetRecord, payload: serde_json::Value) {
        let path = record.path().expect("project records have paths");
        self.storage.inner.insert_json(path.clone(), &payload);
    }

    pub fn node(&self, path: &str, payload: serde_json::Value) -> Rc<AssetRecord> {
        let record = self.add(path);
        self.write(&record, payload);
        record
    }

    pub fn stored_json(&self, record: &AssetRecord) -> serde_json::Value {
        let path = record.path().expect("project records have paths");
        self.storage.inner.get_json(path).expect("payload stored")
    }
}

/// Run `fut` on the pool in the background; the slot fills when it finishes.
pub fn spawn<T: 'static>(
    pool: &LocalPool,
    fut: impl Future<Output = T> + 'static,
) -> Rc<RefCell<Option<T>>> {
    let slot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    pool.spawner()
        .spawn_local(async move {
            let value = fut.await;
            *sink.borrow_mut() = Some(value);
        })
        .unwrap();
    slot
}

/// Load `record` and downcast its live asset to a [`TestNode`].
pub fn load_node(pool: &mut LocalPool, record: &Rc<AssetRecord>) -> Rc<TestNode> {
    pool.run_until(record.get_live_asset::<TestNode>())
        .expect("load succeeds")
        .expect("live asset is a node")
}

/// Log output collected by a scoped subscriber, see [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with warnings and errors of this thread written to the returned
/// buffer.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, CapturedLogs) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, logs)
}
