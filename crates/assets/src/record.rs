//! The durable, addressable unit of the asset system.
//!
//! # State machine
//! ```text
//! Unresolved --resolve_type--> Idle --load--> Loading --ok--> Loaded
//!                               ^                |              |
//!                               +----failure-----+              |
//!                               +----------destroy_live_asset---+
//! any state --dispose--> Destroyed (terminal)
//! ```
//!
//! # Invariants
//! - A live asset exists exactly while the record is `Loaded`.
//! - At most one load is in flight; concurrent callers join it and receive
//!   the same live asset instance.
//! - Every destroy advances the generation counter. A load compares its
//!   starting generation after each suspension point and discards its result
//!   if a destroy happened in between.

use crate::broadcast::{ListenerId, Listeners, ReplacementBroadcaster};
use crate::catalog::RecordCatalog;
use crate::context::AssetContext;
use crate::error::AssetError;
use crate::graph::{LoadGraph, WeakLoadGraph};
use crate::handler::{AssetTypeHandler, LiveAsset, LiveAssetData, RawData, StorageFormat};
use crate::node::LoadNode;
use atelier_common::{AssetId, AssetPath, ReadFailurePolicy};
use atelier_storage::{AssetStorage, StorageError};
use futures::channel::oneshot;
use futures::future::{Either, LocalBoxFuture, Shared};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// JSON field naming the asset type inside a stored payload.
pub const ASSET_TYPE_TAG: &str = "assetType";

/// Observable lifecycle state of an [`AssetRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    Unresolved,
    ResolvingType,
    Idle,
    Loading,
    Loaded,
    Destroyed,
}

/// Identity and stored data of a record to create.
#[derive(Debug, Clone)]
pub struct RecordDescriptor {
    pub id: AssetId,
    pub path: Option<AssetPath>,
    pub is_built_in: bool,
    pub asset_type_id: Option<String>,
    pub stored_settings: Option<serde_json::Value>,
}

impl RecordDescriptor {
    pub fn new(id: AssetId, path: impl Into<AssetPath>) -> Self {
        Self {
            id,
            path: Some(path.into()),
            is_built_in: false,
            asset_type_id: None,
            stored_settings: None,
        }
    }

    pub fn with_asset_type(mut self, asset_type_id: impl Into<String>) -> Self {
        self.asset_type_id = Some(asset_type_id.into());
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.stored_settings = Some(settings);
        self
    }

    pub fn built_in(mut self) -> Self {
        self.is_built_in = true;
        self
    }
}

#[derive(Clone)]
enum LoadOutcome {
    Ready(LiveAssetData),
    Stale,
}

enum Produced {
    Parsed(LiveAssetData),
    /// Live asset taken over from the parent's cache of embedded children.
    Adopted(LiveAssetData),
    /// Read failed and the policy says to resolve empty.
    Empty,
    Stale,
}

type SharedLoad = Shared<LocalBoxFuture<'static, Result<LoadOutcome, AssetError>>>;

#[derive(Clone)]
struct InFlightLoad {
    finished: SharedLoad,
    /// Completes as soon as the live asset exists, before the root's barrier.
    parsed: Shared<oneshot::Receiver<LiveAssetData>>,
}

enum Phase {
    Unresolved,
    ResolvingType,
    Idle,
    Loading(InFlightLoad),
    Loaded(LiveAssetData),
    Destroyed,
}

impl Phase {
    fn state(&self) -> LoadState {
        match self {
            Self::Unresolved => LoadState::Unresolved,
            Self::ResolvingType => LoadState::ResolvingType,
            Self::Idle => LoadState::Idle,
            Self::Loading(_) => LoadState::Loading,
            Self::Loaded(_) => LoadState::Loaded,
            Self::Destroyed => LoadState::Destroyed,
        }
    }
}

struct Embedding {
    parent: Rc<AssetRecord>,
    persistence_key: String,
}

/// A subscription this record made on a dependency through
/// [`LoadOptions::repeat_on_change`](crate::LoadOptions).
struct RepeatSubscription {
    generation: u64,
    dependency: Weak<AssetRecord>,
    listener: ListenerId,
}

struct RecordState {
    phase: Phase,
    generation: u64,
    asset_type_id: Option<String>,
    stored_settings: Option<serde_json::Value>,
    embedded_data: Option<serde_json::Value>,
    previous_live_assets: HashMap<String, Weak<dyn Any>>,
    repeat_subscriptions: Vec<RepeatSubscription>,
    /// Graph the current live asset was loaded in as a dependency.
    settling: Option<WeakLoadGraph>,
    /// Root nodes of graphs whose load went stale, resolved by the next
    /// current live asset.
    deferred_roots: Vec<Rc<LoadNode>>,
}

enum Action {
    Destroyed,
    Cached(LiveAssetData),
    Join(InFlightLoad),
    ResolveType,
    Start,
}

/// One asset of the project and the lifecycle of its live asset.
pub struct AssetRecord {
    id: AssetId,
    path: Option<AssetPath>,
    is_built_in: bool,
    embedding: Option<Embedding>,
    context: AssetContext,
    catalog: Weak<dyn RecordCatalog>,
    broadcaster: ReplacementBroadcaster,
    needs_save: Listeners<String>,
    state: RefCell<RecordState>,
}

impl AssetRecord {
    pub fn new(
        descriptor: RecordDescriptor,
        context: AssetContext,
        catalog: Weak<dyn RecordCatalog>,
    ) -> Rc<Self> {
        let phase = if descriptor.asset_type_id.is_some() {
            Phase::Idle
        } else {
            Phase::Unresolved
        };
        Rc::new(Self {
            id: descriptor.id,
            path: descriptor.path,
            is_built_in: descriptor.is_built_in,
            embedding: None,
            context,
            catalog,
            broadcaster: ReplacementBroadcaster::new(),
            needs_save: Listeners::default(),
            state: RefCell::new(RecordState {
                phase,
                generation: 0,
                asset_type_id: descriptor.asset_type_id,
                stored_settings: descriptor.stored_settings,
                embedded_data: None,
                previous_live_assets: HashMap::new(),
                repeat_subscriptions: Vec::new(),
                settling: None,
                deferred_roots: Vec::new(),
            }),
        })
    }

    /// Create a record whose data lives in memory and is persisted through
    /// this record under `persistence_key`.
    pub fn create_embedded_child(
        self: &Rc<Self>,
        asset_type_id: &str,
        persistence_key: &str,
        data: serde_json::Value,
    ) -> Result<Rc<AssetRecord>, AssetError> {
        if persistence_key.is_empty() {
            return Err(AssetError::AssertionFailure(
                "embedded assets need a non-empty persistence key".into(),
            ));
        }
        if self.context.registry.get(asset_type_id).is_none() {
            return Err(AssetError::UnknownAssetType {
                id: self.id,
                type_id: asset_type_id.to_owned(),
            });
        }
        if self.load_state() == LoadState::Destroyed {
            return Err(AssetError::Destroyed(self.id));
        }
        Ok(Rc::new(Self {
            id: AssetId::new(),
            path: None,
            is_built_in: self.is_built_in,
            embedding: Some(Embedding {
                parent: Rc::clone(self),
                persistence_key: persistence_key.to_owned(),
            }),
            context: self.context.clone(),
            catalog: self.catalog.clone(),
            broadcaster: ReplacementBroadcaster::new(),
            needs_save: Listeners::default(),
            state: RefCell::new(RecordState {
                phase: Phase::Idle,
                generation: 0,
                asset_type_id: Some(asset_type_id.to_owned()),
                stored_settings: None,
                embedded_data: Some(data),
                previous_live_assets: HashMap::new(),
                repeat_subscriptions: Vec::new(),
                settling: None,
                deferred_roots: Vec::new(),
            }),
        }))
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn path(&self) -> Option<&AssetPath> {
        self.path.as_ref()
    }

    pub fn is_built_in(&self) -> bool {
        self.is_built_in
    }

    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }

    pub fn embedded_parent(&self) -> Option<&Rc<AssetRecord>> {
        self.embedding.as_ref().map(|embedding| &embedding.parent)
    }

    pub fn persistence_key(&self) -> Option<&str> {
        self.embedding
            .as_ref()
            .map(|embedding| embedding.persistence_key.as_str())
    }

    pub fn asset_type_id(&self) -> Option<String> {
        self.state.borrow().asset_type_id.clone()
    }

    pub fn stored_settings(&self) -> Option<serde_json::Value> {
        self.state.borrow().stored_settings.clone()
    }

    pub fn set_stored_settings(&self, settings: Option<serde_json::Value>) {
        self.state.borrow_mut().stored_settings = settings;
    }

    pub fn load_state(&self) -> LoadState {
        self.state.borrow().phase.state()
    }

    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    /// The current live asset data, only while `Loaded`.
    pub fn live_asset_data(&self) -> Option<LiveAssetData> {
        match &self.state.borrow().phase {
            Phase::Loaded(data) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn broadcaster(&self) -> &ReplacementBroadcaster {
        &self.broadcaster
    }

    pub fn on_live_asset_data_change(&self, cb: impl Fn(&LiveAssetData) + 'static) -> ListenerId {
        self.broadcaster.on_live_asset_data_change(cb)
    }

    pub fn remove_on_live_asset_data_change(&self, id: ListenerId) -> bool {
        self.broadcaster.remove_on_live_asset_data_change(id)
    }

    pub fn on_live_asset_needs_replacement(&self, cb: impl Fn() + 'static) -> ListenerId {
        self.broadcaster.on_live_asset_needs_replacement(cb)
    }

    pub fn remove_on_live_asset_needs_replacement(&self, id: ListenerId) -> bool {
        self.broadcaster.remove_on_live_asset_needs_replacement(id)
    }

    /// Fires with the persistence key of an embedded child whose data changed.
    pub fn on_needs_save(&self, cb: impl Fn(&str) + 'static) -> ListenerId {
        self.needs_save.add(Rc::new(move |key: &String| cb(key)))
    }

    pub fn remove_on_needs_save(&self, id: ListenerId) -> bool {
        self.needs_save.remove(id)
    }

    /// Number of live repeat subscriptions this record holds on dependencies.
    pub fn repeat_subscription_count(&self) -> usize {
        self.state.borrow().repeat_subscriptions.len()
    }

    /// Whether a still-alive live asset of an embedded child is cached under
    /// `persistence_key`.
    pub fn has_previous_embedded_live_asset(&self, persistence_key: &str) -> bool {
        self.state
            .borrow()
            .previous_live_assets
            .get(persistence_key)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Determine the asset type if it is not known yet.
    ///
    /// Probes the path's extension first, then the `assetType` tag of the
    /// stored JSON payload. Once set the type is never probed again. `None`
    /// means the type could not be determined, which is not an error here.
    pub async fn resolve_type(self: &Rc<Self>) -> Option<String> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(type_id) = &state.asset_type_id {
                return Some(type_id.clone());
            }
            if matches!(state.phase, Phase::Destroyed) {
                return None;
            }
            if matches!(state.phase, Phase::Unresolved) {
                state.phase = Phase::ResolvingType;
            }
        }

        let probed = self.probe_type().await;

        let mut state = self.state.borrow_mut();
        if state.asset_type_id.is_none() {
            state.asset_type_id = probed;
        }
        if matches!(state.phase, Phase::Unresolved | Phase::ResolvingType) {
            state.phase = if state.asset_type_id.is_some() {
                Phase::Idle
            } else {
                Phase::Unresolved
            };
        }
        state.asset_type_id.clone()
    }

    async fn probe_type(&self) -> Option<String> {
        let registry = &self.context.registry;
        if let Some(extension) = self.path.as_ref().and_then(AssetPath::extension) {
            if let Some(type_id) = registry.type_for_extension(&extension) {
                return Some(type_id.to_owned());
            }
        }

        let payload = match self.read_raw_as(StorageFormat::Json).await {
            Ok(RawData::Json(value)) => value,
            Ok(_) => return None,
            Err(err) => {
                debug!(id = %self.id, error = %err, "no type tag readable from payload");
                return None;
            }
        };
        let tag = payload.get(ASSET_TYPE_TAG)?.as_str()?;
        if registry.get(tag).is_none() {
            warn!(id = %self.id, type_id = tag, "payload names an unregistered asset type");
            return None;
        }
        Some(tag.to_owned())
    }

    fn handler(&self) -> Result<Rc<dyn AssetTypeHandler>, AssetError> {
        let type_id = self
            .asset_type_id()
            .ok_or(AssetError::TypeResolutionFailure { id: self.id })?;
        self.context
            .registry
            .get(&type_id)
            .ok_or(AssetError::UnknownAssetType {
                id: self.id,
                type_id,
            })
    }

    /// Get the live asset, loading it if needed.
    ///
    /// If the live asset was built as a dependency of another load, this also
    /// waits until that load has delivered all of its references.
    pub async fn get_live_asset_data(self: &Rc<Self>) -> Result<LiveAssetData, AssetError> {
        self.live_asset_data_in(None).await
    }

    /// Get the live asset downcast to `T`. `None` if the load resolved empty
    /// or the asset has another type.
    pub async fn get_live_asset<T: 'static>(self: &Rc<Self>) -> Result<Option<Rc<T>>, AssetError> {
        Ok(self.get_live_asset_data().await?.live_asset_as::<T>())
    }

    pub(crate) async fn live_asset_data_in(
        self: &Rc<Self>,
        graph: Option<&LoadGraph>,
    ) -> Result<LiveAssetData, AssetError> {
        let max_retries = self.context.config.max_stale_retries;
        let mut attempts = 0;
        loop {
            let outcome = match self.load_once(graph).await? {
                LoadOutcome::Ready(data) if graph.is_none() => self.settle(data).await,
                outcome => outcome,
            };
            match outcome {
                LoadOutcome::Ready(data) => return Ok(data),
                LoadOutcome::Stale => {
                    attempts += 1;
                    if attempts > max_retries {
                        warn!(id = %self.id, attempts, "giving up on load discarded by destroys");
                        return Err(AssetError::StaleRetriesExhausted {
                            id: self.id,
                            attempts,
                        });
                    }
                    debug!(id = %self.id, attempts, "load went stale, retrying");
                }
            }
        }
    }

    /// Wait for the graph that loaded this record as a dependency to deliver
    /// every reference. `Stale` if a destroy happened meanwhile.
    async fn settle(&self, data: LiveAssetData) -> LoadOutcome {
        let (generation, graph) = {
            let state = self.state.borrow();
            let graph = state.settling.as_ref().and_then(WeakLoadGraph::upgrade);
            (state.generation, graph)
        };
        let Some(graph) = graph else {
            return LoadOutcome::Ready(data);
        };
        graph.wait_for_all().await;
        drop(graph);
        let mut state = self.state.borrow_mut();
        if state.generation != generation {
            return LoadOutcome::Stale;
        }
        state.settling = None;
        LoadOutcome::Ready(data)
    }

    async fn load_once(self: &Rc<Self>, graph: Option<&LoadGraph>) -> Result<LoadOutcome, AssetError> {
        loop {
            let action = {
                let state = self.state.borrow();
                match &state.phase {
                    Phase::Destroyed => Action::Destroyed,
                    Phase::Loaded(data) => Action::Cached(data.clone()),
                    Phase::Loading(in_flight) => Action::Join(in_flight.clone()),
                    Phase::Unresolved | Phase::ResolvingType => Action::ResolveType,
                    Phase::Idle => Action::Start,
                }
            };
            match action {
                Action::Destroyed => return Err(AssetError::Destroyed(self.id)),
                Action::Cached(data) => return Ok(LoadOutcome::Ready(data)),
                Action::Join(in_flight) => return Self::join(in_flight, graph.is_some()).await,
                Action::ResolveType => {
                    if self.resolve_type().await.is_none() {
                        return Err(match self.load_state() {
                            LoadState::Destroyed => AssetError::Destroyed(self.id),
                            _ => AssetError::TypeResolutionFailure { id: self.id },
                        });
                    }
                }
                Action::Start => {
                    let in_flight = self.start_load(graph.cloned());
                    return Self::join(in_flight, graph.is_some()).await;
                }
            }
        }
    }

    /// Wait for an in-flight load. Requests made from inside another load
    /// graph only wait for the live asset to exist, not for the in-flight
    /// load's own graph to settle, so graphs referencing each other's roots
    /// cannot wait on one another.
    async fn join(in_flight: InFlightLoad, nested: bool) -> Result<LoadOutcome, AssetError> {
        if !nested {
            return in_flight.finished.await;
        }
        match futures::future::select(in_flight.parsed, in_flight.finished).await {
            Either::Left((Ok(data), _)) => Ok(LoadOutcome::Ready(data)),
            Either::Left((Err(_), finished)) => finished.await,
            Either::Right((result, _)) => result,
        }
    }

    fn start_load(self: &Rc<Self>, graph: Option<LoadGraph>) -> InFlightLoad {
        let (parsed_tx, parsed_rx) = oneshot::channel();
        let mut state = self.state.borrow_mut();
        let generation = state.generation;
        state.settling = graph.as_ref().map(LoadGraph::downgrade);
        let finished = Rc::clone(self)
            .run_load(generation, graph, parsed_tx)
            .boxed_local()
            .shared();
        let in_flight = InFlightLoad {
            finished,
            parsed: parsed_rx.shared(),
        };
        state.phase = Phase::Loading(in_flight.clone());
        debug!(id = %self.id, generation, "starting live asset load");
        in_flight
    }

    async fn run_load(
        self: Rc<Self>,
        generation: u64,
        graph: Option<LoadGraph>,
        parsed_tx: oneshot::Sender<LiveAssetData>,
    ) -> Result<LoadOutcome, AssetError> {
        match self.produce(generation, graph, parsed_tx).await {
            Ok(Produced::Parsed(data)) => Ok(self.finish_load(generation, data, true)),
            Ok(Produced::Adopted(data)) => Ok(self.finish_load(generation, data, false)),
            Ok(Produced::Empty) => {
                if self.fail_load(generation) {
                    Ok(LoadOutcome::Ready(LiveAssetData::empty()))
                } else {
                    Ok(LoadOutcome::Stale)
                }
            }
            Ok(Produced::Stale) => Ok(LoadOutcome::Stale),
            Err(err) => {
                if self.fail_load(generation) {
                    Err(err)
                } else {
                    Ok(LoadOutcome::Stale)
                }
            }
        }
    }

    async fn produce(
        self: &Rc<Self>,
        generation: u64,
        graph: Option<LoadGraph>,
        parsed_tx: oneshot::Sender<LiveAssetData>,
    ) -> Result<Produced, AssetError> {
        let handler = self.handler()?;

        if let Some(previous) = self.previous_embedded_live_asset() {
            debug!(id = %self.id, "reusing live asset of previous embedded child");
            let data = LiveAssetData {
                live_asset: Some(previous),
                auxiliary_data: None,
            };
            let _ = parsed_tx.send(data.clone());
            return Ok(Produced::Adopted(data));
        }

        let raw = match self.read_raw_as(handler.storage_format()).await {
            Ok(raw) => raw,
            Err(AssetError::ReadFailure { id, source })
                if self.context.config.read_failure_policy == ReadFailurePolicy::ResolveEmpty =>
            {
                warn!(id = %id, error = %source, "failed to read asset data, resolving empty");
                if self.generation() != generation {
                    return Ok(Produced::Stale);
                }
                return Ok(Produced::Empty);
            }
            Err(err) => return Err(err),
        };
        if self.generation() != generation {
            return Ok(Produced::Stale);
        }

        let (graph, is_root) = match graph {
            Some(graph) => (graph, false),
            None => (
                LoadGraph::new(self.id, self.catalog.clone(), Rc::clone(&self.context.spawner)),
                true,
            ),
        };
        let parsed = {
            let _span = tracing::info_span!("parse_asset", id = %self.id).entered();
            let _frame = graph.push_frame(self, generation);
            handler.parse_data(raw, &graph)
        };
        let data = match parsed {
            Ok(parsed) => LiveAssetData::from(parsed),
            Err(err) => {
                if is_root {
                    graph.resolve_root(LiveAssetData::empty());
                }
                return Err(AssetError::Parse {
                    id: self.id,
                    message: err.to_string(),
                });
            }
        };
        let _ = parsed_tx.send(data.clone());

        if is_root {
            graph.wait_for_all().await;
            if self.generation() == generation {
                graph.resolve_root(data.clone());
            } else {
                self.defer_root(&graph);
            }
        }
        Ok(Produced::Parsed(data))
    }

    /// Hold back the root node of a stale graph so the assets that referenced
    /// this record receive the live asset of a current load instead.
    fn defer_root(&self, graph: &LoadGraph) {
        let Some(node) = graph.node(graph.root_id()) else {
            return;
        };
        let resolved = {
            let mut state = self.state.borrow_mut();
            match &state.phase {
                Phase::Loaded(data) => Some(data.clone()),
                Phase::Destroyed => Some(LiveAssetData::empty()),
                _ => {
                    state.deferred_roots.push(Rc::clone(&node));
                    None
                }
            }
        };
        if let Some(data) = resolved {
            node.resolve(data);
        }
    }

    fn resolve_deferred_roots(&self, data: &LiveAssetData) {
        let deferred = std::mem::take(&mut self.state.borrow_mut().deferred_roots);
        for node in deferred {
            node.resolve(data.clone());
        }
    }

    /// Commit a produced live asset. Returns `Stale` and tears the asset down
    /// again if a destroy happened while it was being produced.
    fn finish_load(self: &Rc<Self>, generation: u64, data: LiveAssetData, owned: bool) -> LoadOutcome {
        let current = {
            let mut state = self.state.borrow_mut();
            let current = state.generation == generation && matches!(state.phase, Phase::Loading(_));
            if current {
                state.phase = Phase::Loaded(data.clone());
            }
            current
        };
        if !current {
            debug!(id = %self.id, generation, "discarding stale live asset");
            self.drop_repeat_subscriptions(|g| g == generation);
            if owned {
                self.destroy_with_handler(&data);
            }
            return LoadOutcome::Stale;
        }
        if let Some(embedding) = &self.embedding {
            embedding
                .parent
                .remember_embedded_live_asset(&embedding.persistence_key, &data);
        }
        debug!(id = %self.id, generation, "live asset loaded");
        self.broadcaster.notify_loaded(&data);
        self.resolve_deferred_roots(&data);
        LoadOutcome::Ready(data)
    }

    /// Returns false if the load was already superseded.
    fn fail_load(&self, generation: u64) -> bool {
        {
            let mut state = self.state.borrow_mut();
            if state.generation != generation || !matches!(state.phase, Phase::Loading(_)) {
                return false;
            }
            state.phase = Phase::Idle;
        }
        self.drop_repeat_subscriptions(|g| g == generation);
        let empty = LiveAssetData::empty();
        self.broadcaster.notify_loaded(&empty);
        self.resolve_deferred_roots(&empty);
        true
    }

    fn destroy_with_handler(&self, data: &LiveAssetData) {
        let Some(live_asset) = &data.live_asset else {
            return;
        };
        match self.handler() {
            Ok(handler) => handler.destroy(live_asset, data.auxiliary_data.as_ref()),
            Err(err) => warn!(id = %self.id, error = %err, "cannot destroy live asset without handler"),
        }
    }

    /// Tear down the live asset so the next request rebuilds it.
    ///
    /// Cancels an in-flight load, destroys the live asset through its
    /// handler, drops the repeat subscriptions made while building it and
    /// notifies listeners. Does nothing unless `Loaded` or `Loading`.
    pub fn destroy_live_asset(self: &Rc<Self>) {
        self.invalidate(true);
    }

    fn invalidate(self: &Rc<Self>, notify_parent: bool) -> bool {
        let previous = {
            let mut state = self.state.borrow_mut();
            if !matches!(state.phase, Phase::Loaded(_) | Phase::Loading(_)) {
                return false;
            }
            state.generation += 1;
            state.settling = None;
            std::mem::replace(&mut state.phase, Phase::Idle)
        };
        debug!(id = %self.id, generation = self.generation(), "destroying live asset");
        self.drop_repeat_subscriptions(|_| true);
        if let Phase::Loaded(data) = previous {
            self.destroy_with_handler(&data);
        }
        if let Some(embedding) = &self.embedding {
            embedding
                .parent
                .forget_embedded_live_asset(&embedding.persistence_key);
            if notify_parent {
                embedding.parent.needs_save.notify(&embedding.persistence_key);
            }
        }
        self.broadcaster.notify_destroyed();
        true
    }

    /// Terminal teardown on asset deletion or project close. No load can
    /// start afterwards.
    pub fn dispose(self: &Rc<Self>) {
        if self.load_state() == LoadState::Destroyed {
            return;
        }
        self.invalidate(false);
        {
            let mut state = self.state.borrow_mut();
            state.phase = Phase::Destroyed;
            state.generation += 1;
            state.previous_live_assets.clear();
        }
        self.drop_repeat_subscriptions(|_| true);
        self.resolve_deferred_roots(&LiveAssetData::empty());
        self.broadcaster.clear();
        self.needs_save.clear();
        debug!(id = %self.id, "asset record disposed");
    }

    pub(crate) fn track_repeat_subscription(
        &self,
        generation: u64,
        dependency: &Rc<AssetRecord>,
        cb: Rc<dyn Fn(&LiveAssetData)>,
    ) {
        if self.generation() != generation {
            return;
        }
        let listener = dependency.broadcaster.on_live_asset_data_change_rc(cb);
        self.state
            .borrow_mut()
            .repeat_subscriptions
            .push(RepeatSubscription {
                generation,
                dependency: Rc::downgrade(dependency),
                listener,
            });
    }

    fn drop_repeat_subscriptions(&self, matches: impl Fn(u64) -> bool) {
        let dropped: Vec<RepeatSubscription> = {
            let mut state = self.state.borrow_mut();
            let (dropped, kept) = std::mem::take(&mut state.repeat_subscriptions)
                .into_iter()
                .partition(|sub| matches(sub.generation));
            state.repeat_subscriptions = kept;
            dropped
        };
        for sub in dropped {
            if let Some(dependency) = sub.dependency.upgrade() {
                dependency
                    .broadcaster
                    .remove_on_live_asset_data_change(sub.listener);
            }
        }
    }

    fn remember_embedded_live_asset(&self, persistence_key: &str, data: &LiveAssetData) {
        if let Some(live_asset) = &data.live_asset {
            self.state
                .borrow_mut()
                .previous_live_assets
                .insert(persistence_key.to_owned(), Rc::downgrade(live_asset));
        }
    }

    fn forget_embedded_live_asset(&self, persistence_key: &str) {
        self.state
            .borrow_mut()
            .previous_live_assets
            .remove(persistence_key);
    }

    fn previous_embedded_live_asset(&self) -> Option<LiveAsset> {
        let embedding = self.embedding.as_ref()?;
        let parent_state = embedding.parent.state.borrow();
        parent_state
            .previous_live_assets
            .get(&embedding.persistence_key)?
            .upgrade()
    }

    /// A deep copy of an embedded record's data.
    pub fn read_embedded(&self) -> Result<serde_json::Value, AssetError> {
        if self.embedding.is_none() {
            return Err(AssetError::AssertionFailure(format!(
                "asset {} is not embedded",
                self.id
            )));
        }
        Ok(self
            .state
            .borrow()
            .embedded_data
            .clone()
            .unwrap_or(serde_json::Value::Null))
    }

    /// Replace an embedded record's data and persist it through the parent.
    ///
    /// The current live asset no longer matches the data and is destroyed.
    pub async fn write_embedded(self: &Rc<Self>, data: serde_json::Value) -> Result<(), AssetError> {
        let Some(embedding) = &self.embedding else {
            return Err(AssetError::AssertionFailure(format!(
                "cannot write embedded data to asset {}, it is not embedded",
                self.id
            )));
        };
        self.state.borrow_mut().embedded_data = Some(data.clone());
        self.invalidate(false);
        embedding
            .parent
            .persist_embedded_child(&embedding.persistence_key, data)
            .await
    }

    /// Read-modify-write of this record's JSON payload with a child's data
    /// stored under its persistence key.
    async fn persist_embedded_child(
        self: &Rc<Self>,
        persistence_key: &str,
        data: serde_json::Value,
    ) -> Result<(), AssetError> {
        self.needs_save.notify(&persistence_key.to_owned());

        let mut payload = match self.read_raw_as(StorageFormat::Json).await {
            Ok(RawData::Json(value)) => value,
            Ok(_) => serde_json::Value::Null,
            Err(AssetError::ReadFailure {
                source: StorageError::NotFound(_),
                ..
            }) => serde_json::Value::Null,
            Err(err) => return Err(err),
        };
        if payload.is_null() {
            payload = serde_json::Value::Object(serde_json::Map::new());
        }
        let Some(object) = payload.as_object_mut() else {
            return Err(AssetError::AssertionFailure(format!(
                "payload of asset {} is not a JSON object, cannot embed {persistence_key:?}",
                self.id
            )));
        };
        object.insert(persistence_key.to_owned(), data);
        self.write_raw(RawData::Json(payload)).await
    }

    fn storage(&self) -> Result<&dyn AssetStorage, AssetError> {
        if self.is_built_in {
            self.context
                .built_in_storage
                .as_deref()
                .ok_or_else(|| {
                    AssetError::AssertionFailure(format!(
                        "built-in asset {} has no built-in storage to read from",
                        self.id
                    ))
                })
        } else {
            Ok(self.context.storage.as_ref())
        }
    }

    /// The stored bytes of this record.
    pub async fn read_raw(&self) -> Result<Vec<u8>, AssetError> {
        if self.embedding.is_some() {
            let data = self.read_embedded()?;
            return Ok(RawData::Json(data).encode());
        }
        let path = self.path.as_ref().ok_or_else(|| {
            AssetError::AssertionFailure(format!("asset {} has no path to read from", self.id))
        })?;
        self.storage()?
            .read(path)
            .await
            .map_err(|source| AssetError::ReadFailure {
                id: self.id,
                source,
            })
    }

    /// The stored data decoded as `format`.
    pub async fn read_raw_as(&self, format: StorageFormat) -> Result<RawData, AssetError> {
        if self.embedding.is_some() && format == StorageFormat::Json {
            return Ok(RawData::Json(self.read_embedded()?));
        }
        let bytes = self.read_raw().await?;
        RawData::decode(format, bytes).map_err(|err| AssetError::Parse {
            id: self.id,
            message: err.to_string(),
        })
    }

    /// Replace the stored data. Embedded records store it in memory and
    /// persist through their parent.
    pub async fn write_raw(self: &Rc<Self>, raw: RawData) -> Result<(), AssetError> {
        if let Some(embedding) = &self.embedding {
            let RawData::Json(value) = raw else {
                return Err(AssetError::AssertionFailure(
                    "embedded assets can only hold JSON data".into(),
                ));
            };
            self.state.borrow_mut().embedded_data = Some(value.clone());
            return Box::pin(embedding.parent.persist_embedded_child(&embedding.persistence_key, value))
                .await;
        }
        let path = self.path.as_ref().ok_or_else(|| {
            AssetError::AssertionFailure(format!("asset {} has no path to write to", self.id))
        })?;
        self.storage()?.write(path, raw.encode()).await?;
        Ok(())
    }

    /// Data for packaging this asset into a bundle.
    ///
    /// Fails with [`AssetError::AssertionFailure`] if the handler declares no
    /// binary format and provides no bundle encoding.
    pub async fn bundled_data(self: &Rc<Self>) -> Result<Vec<u8>, AssetError> {
        if self.resolve_type().await.is_none() {
            return Err(AssetError::TypeResolutionFailure { id: self.id });
        }
        let handler = self.handler()?;
        let raw = self.read_raw_as(handler.storage_format()).await?;
        if let Some(bytes) = handler.create_bundled_data(&raw) {
            return Ok(bytes);
        }
        match raw {
            RawData::Binary(bytes) => Ok(bytes),
            _ => Err(AssetError::AssertionFailure(format!(
                "asset type {:?} declares no binary format",
                handler.asset_type_id()
            ))),
        }
    }
}

impl std::fmt::Debug for AssetRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRecord")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("is_built_in", &self.is_built_in)
            .field("persistence_key", &self.persistence_key())
            .field("load_state", &self.load_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use crate::handler::{AssetTypeRegistry, ParsedAsset};
    use atelier_storage::MemoryStorage;
    use futures::executor::LocalPool;

    struct Unit;

    impl AssetTypeHandler for Unit {
        fn asset_type_id(&self) -> &str {
            "unit"
        }

        fn extensions(&self) -> &[&'static str] {
            &["unit"]
        }

        fn storage_format(&self) -> StorageFormat {
            StorageFormat::Text
        }

        fn parse_data(&self, raw: RawData, _graph: &LoadGraph) -> Result<ParsedAsset, ParseError> {
            Ok(ParsedAsset::new(raw.as_text().unwrap_or_default().to_owned()))
        }
    }

    struct NoRecords;

    impl RecordCatalog for NoRecords {
        fn get_record(&self, _id: AssetId) -> Option<Rc<AssetRecord>> {
            None
        }
    }

    fn record(pool: &LocalPool, descriptor: RecordDescriptor) -> (Rc<MemoryStorage>, Rc<AssetRecord>) {
        let storage = Rc::new(MemoryStorage::new());
        let mut registry = AssetTypeRegistry::new();
        registry.register(Unit).unwrap();
        let context = AssetContext::new(Rc::clone(&storage), registry, pool.spawner());
        let catalog: Weak<dyn RecordCatalog> = Weak::<NoRecords>::new();
        (storage, AssetRecord::new(descriptor, context, catalog))
    }

    #[test]
    fn known_type_starts_idle() {
        let pool = LocalPool::new();
        let (_, typed) = record(
            &pool,
            RecordDescriptor::new(AssetId::new(), "a.bin").with_asset_type("unit"),
        );
        assert_eq!(typed.load_state(), LoadState::Idle);

        let (_, untyped) = record(&pool, RecordDescriptor::new(AssetId::new(), "a.unit"));
        assert_eq!(untyped.load_state(), LoadState::Unresolved);
    }

    #[test]
    fn type_is_resolved_once_from_extension() {
        let mut pool = LocalPool::new();
        let (storage, record) = record(&pool, RecordDescriptor::new(AssetId::new(), "a.unit"));

        assert_eq!(pool.run_until(record.resolve_type()).as_deref(), Some("unit"));
        assert_eq!(record.load_state(), LoadState::Idle);
        assert_eq!(storage.read_count(&AssetPath::new("a.unit")), 0);
    }

    #[test]
    fn generation_advances_on_destroy_only_when_loaded() {
        let mut pool = LocalPool::new();
        let (storage, record) = record(&pool, RecordDescriptor::new(AssetId::new(), "a.unit"));
        storage.insert("a.unit", "payload");

        record.destroy_live_asset();
        assert_eq!(record.generation(), 0);

        let data = pool.run_until(record.get_live_asset_data()).unwrap();
        assert_eq!(data.live_asset_as::<String>().unwrap().as_str(), "payload");
        record.destroy_live_asset();
        assert_eq!(record.generation(), 1);
        assert!(record.live_asset_data().is_none());
    }

    #[test]
    fn dispose_is_terminal() {
        let mut pool = LocalPool::new();
        let (storage, record) = record(&pool, RecordDescriptor::new(AssetId::new(), "a.unit"));
        storage.insert("a.unit", "payload");
        pool.run_until(record.get_live_asset_data()).unwrap();

        record.dispose();
        record.dispose();
        assert_eq!(record.load_state(), LoadState::Destroyed);
        assert!(matches!(
            pool.run_until(record.get_live_asset_data()),
            Err(AssetError::Destroyed(_))
        ));
        assert!(pool.run_until(record.resolve_type()).is_some());
    }
}
