//! Per-resolution dependency tracking.
//!
//! A [`LoadGraph`] lives for one top-level `get_live_asset_data` call. Handlers
//! use it to request other assets by id; every id gets one [`LoadNode`], so a
//! dependency reached along several paths is loaded once. References back to
//! the root never start a second load of the root: its node is resolved by
//! the root caller once [`LoadGraph::wait_for_all`] returns, which is what lets
//! cyclic references complete.

use crate::catalog::RecordCatalog;
use crate::error::AssetError;
use crate::handler::LiveAssetData;
use crate::node::LoadNode;
use crate::record::AssetRecord;
use atelier_common::AssetId;
use futures::task::{LocalSpawn, LocalSpawnExt};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// Options for [`LoadGraph::get_live_asset_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Call the callback again every time the dependency is rebuilt, for as
    /// long as the requesting asset's current live asset exists.
    pub repeat_on_change: bool,
}

impl LoadOptions {
    pub fn repeat_on_change() -> Self {
        Self {
            repeat_on_change: true,
        }
    }
}

#[derive(Clone)]
struct ActiveFrame {
    record: Rc<AssetRecord>,
    generation: u64,
}

struct GraphInner {
    root_id: AssetId,
    nodes: RefCell<HashMap<AssetId, Rc<LoadNode>>>,
    active_stack: RefCell<Vec<ActiveFrame>>,
    catalog: Weak<dyn RecordCatalog>,
    spawner: Rc<dyn LocalSpawn>,
}

/// Dependency tracker for one root resolution. Cheap to clone.
#[derive(Clone)]
pub struct LoadGraph {
    inner: Rc<GraphInner>,
}

/// Non-owning handle to a [`LoadGraph`]. Fails to upgrade once the root load
/// and every dependency load of the graph have finished.
#[derive(Clone)]
pub(crate) struct WeakLoadGraph(Weak<GraphInner>);

impl WeakLoadGraph {
    pub(crate) fn upgrade(&self) -> Option<LoadGraph> {
        self.0.upgrade().map(|inner| LoadGraph { inner })
    }
}

impl LoadGraph {
    pub(crate) fn new(
        root_id: AssetId,
        catalog: Weak<dyn RecordCatalog>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(root_id, Rc::new(LoadNode::new(root_id)));
        Self {
            inner: Rc::new(GraphInner {
                root_id,
                nodes: RefCell::new(nodes),
                active_stack: RefCell::new(Vec::new()),
                catalog,
                spawner,
            }),
        }
    }

    pub fn root_id(&self) -> AssetId {
        self.inner.root_id
    }

    pub(crate) fn downgrade(&self) -> WeakLoadGraph {
        WeakLoadGraph(Rc::downgrade(&self.inner))
    }

    pub fn node(&self, id: AssetId) -> Option<Rc<LoadNode>> {
        self.inner.nodes.borrow().get(&id).cloned()
    }

    /// Number of nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    /// The record whose data is being parsed right now, if any.
    pub fn current_record(&self) -> Option<Rc<AssetRecord>> {
        self.inner
            .active_stack
            .borrow()
            .last()
            .map(|frame| Rc::clone(&frame.record))
    }

    pub fn depth(&self) -> usize {
        self.inner.active_stack.borrow().len()
    }

    /// Request the live asset of `id`. `cb` runs once with the result, either
    /// immediately if it is already known or when the dependency resolves. A
    /// dependency that fails to load resolves with an empty value.
    pub fn get_live_asset_data(
        &self,
        id: AssetId,
        cb: impl Fn(&LiveAssetData) + 'static,
        options: LoadOptions,
    ) {
        let cb: Rc<dyn Fn(&LiveAssetData)> = Rc::new(cb);
        let gate = if options.repeat_on_change {
            self.subscribe_repeat(id, Rc::clone(&cb))
        } else {
            None
        };
        let node = self.node_for(id);
        node.on_load(move |data| {
            cb(data);
            if let Some(gate) = gate {
                gate.arm(data);
            }
        });
    }

    /// Create an embedded child of the asset being parsed and load it as part
    /// of this graph.
    pub fn get_embedded_live_asset_data(
        &self,
        asset_type_id: &str,
        persistence_key: &str,
        data: serde_json::Value,
        cb: impl FnOnce(&LiveAssetData) + 'static,
    ) -> Result<Rc<AssetRecord>, AssetError> {
        let parent = self.current_record().ok_or_else(|| {
            AssetError::AssertionFailure(
                "embedded assets can only be requested while parsing".into(),
            )
        })?;
        let child = parent.create_embedded_child(asset_type_id, persistence_key, data)?;
        let node = Rc::new(LoadNode::new(child.id()));
        self.inner
            .nodes
            .borrow_mut()
            .insert(child.id(), Rc::clone(&node));
        self.spawn_load(Rc::clone(&child), Rc::clone(&node));
        node.on_load(cb);
        Ok(child)
    }

    /// Wait until every node except the root has resolved, including nodes
    /// added while waiting.
    pub async fn wait_for_all(&self) {
        loop {
            let pending: Vec<_> = self
                .inner
                .nodes
                .borrow()
                .values()
                .filter(|node| node.id() != self.inner.root_id && !node.is_resolved())
                .map(|node| node.wait_for_load())
                .collect();
            if pending.is_empty() {
                break;
            }
            futures::future::join_all(pending).await;
        }
    }

    pub(crate) fn resolve_root(&self, data: LiveAssetData) {
        if let Some(root) = self.node(self.inner.root_id) {
            root.resolve(data);
        }
    }

    /// Push `record` onto the active stack until the returned frame drops.
    pub(crate) fn push_frame(&self, record: &Rc<AssetRecord>, generation: u64) -> StackFrame<'_> {
        let mut stack = self.inner.active_stack.borrow_mut();
        stack.push(ActiveFrame {
            record: Rc::clone(record),
            generation,
        });
        StackFrame {
            graph: self,
            record_id: record.id(),
            depth: stack.len(),
        }
    }

    fn record(&self, id: AssetId) -> Option<Rc<AssetRecord>> {
        self.inner.catalog.upgrade()?.get_record(id)
    }

    fn node_for(&self, id: AssetId) -> Rc<LoadNode> {
        if let Some(node) = self.node(id) {
            return node;
        }
        let node = Rc::new(LoadNode::new(id));
        self.inner.nodes.borrow_mut().insert(id, Rc::clone(&node));
        match self.record(id) {
            Some(record) => self.spawn_load(record, Rc::clone(&node)),
            None => {
                warn!(id = %id, "referenced asset does not exist");
                node.resolve(LiveAssetData::empty());
            }
        }
        node
    }

    fn spawn_load(&self, record: Rc<AssetRecord>, node: Rc<LoadNode>) {
        let graph = self.clone();
        let task_node = Rc::clone(&node);
        let task = async move {
            let data = match record.live_asset_data_in(Some(&graph)).await {
                Ok(data) => data,
                Err(err) => {
                    warn!(id = %record.id(), error = %err, "dependency failed to load");
                    LiveAssetData::empty()
                }
            };
            task_node.resolve(data);
        };
        if let Err(err) = self.inner.spawner.spawn_local(task) {
            warn!(id = %node.id(), error = %err, "could not spawn dependency load");
            node.resolve(LiveAssetData::empty());
        }
    }

    fn subscribe_repeat(&self, id: AssetId, cb: Rc<dyn Fn(&LiveAssetData)>) -> Option<Rc<RepeatGate>> {
        let Some(frame) = self.inner.active_stack.borrow().last().cloned() else {
            warn!(id = %id, "repeat_on_change requested outside of a parse, ignoring");
            return None;
        };
        let Some(dependency) = self.record(id) else {
            debug!(id = %id, "repeat_on_change target does not exist");
            return None;
        };
        let gate = Rc::new(RepeatGate::default());
        let listener_gate = Rc::clone(&gate);
        frame.record.track_repeat_subscription(
            frame.generation,
            &dependency,
            Rc::new(move |data: &LiveAssetData| {
                if listener_gate.admit(data) {
                    cb(data);
                }
            }),
        );
        Some(gate)
    }
}

/// Filters a dependency's change broadcasts down to "a new live asset the
/// subscriber has not seen yet", counted from the first node delivery.
#[derive(Default)]
struct RepeatGate {
    armed: Cell<bool>,
    last: RefCell<Option<Weak<dyn Any>>>,
}

impl RepeatGate {
    fn arm(&self, data: &LiveAssetData) {
        *self.last.borrow_mut() = data.live_asset.as_ref().map(Rc::downgrade);
        self.armed.set(true);
    }

    fn admit(&self, data: &LiveAssetData) -> bool {
        let Some(live) = &data.live_asset else {
            return false;
        };
        if !self.armed.get() {
            return false;
        }
        let current = Rc::downgrade(live);
        let mut last = self.last.borrow_mut();
        if last.as_ref().is_some_and(|seen| Weak::ptr_eq(seen, &current)) {
            return false;
        }
        *last = Some(current);
        true
    }
}

/// Active-stack entry. Pops itself on drop, so frames always nest.
pub(crate) struct StackFrame<'a> {
    graph: &'a LoadGraph,
    record_id: AssetId,
    depth: usize,
}

impl Drop for StackFrame<'_> {
    fn drop(&mut self) {
        let mut stack = self.graph.inner.active_stack.borrow_mut();
        debug_assert_eq!(stack.len(), self.depth, "load graph frames must nest");
        let popped = stack.pop();
        debug_assert_eq!(popped.map(|frame| frame.record.id()), Some(self.record_id));
    }
}
