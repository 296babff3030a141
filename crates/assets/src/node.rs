use crate::handler::LiveAssetData;
use atelier_common::AssetId;
use futures::channel::oneshot;
use std::cell::RefCell;
use std::future::Future;

type Subscriber = Box<dyn FnOnce(&LiveAssetData)>;

enum NodeState {
    Pending {
        subscribers: Vec<Subscriber>,
        waiters: Vec<oneshot::Sender<LiveAssetData>>,
    },
    Resolved(LiveAssetData),
}

/// One asset id within a [`LoadGraph`](crate::LoadGraph): multiplexes every
/// request for that id onto a single load.
///
/// The value is set at most once. Subscribers registered before resolution
/// run in registration order when it resolves; later ones run immediately.
/// Each subscriber runs exactly once.
pub struct LoadNode {
    id: AssetId,
    state: RefCell<NodeState>,
}

impl LoadNode {
    pub fn new(id: AssetId) -> Self {
        Self {
            id,
            state: RefCell::new(NodeState::Pending {
                subscribers: Vec::new(),
                waiters: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.state.borrow(), NodeState::Resolved(_))
    }

    pub fn value(&self) -> Option<LiveAssetData> {
        match &*self.state.borrow() {
            NodeState::Resolved(value) => Some(value.clone()),
            NodeState::Pending { .. } => None,
        }
    }

    pub fn on_load(&self, cb: impl FnOnce(&LiveAssetData) + 'static) {
        let resolved = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                NodeState::Resolved(value) => value.clone(),
                NodeState::Pending { subscribers, .. } => {
                    subscribers.push(Box::new(cb));
                    return;
                }
            }
        };
        cb(&resolved);
    }

    /// Set the value and drain subscribers. Returns false, leaving the first
    /// value in place, if the node was already resolved.
    pub fn resolve(&self, value: LiveAssetData) -> bool {
        let (subscribers, waiters) = {
            let mut state = self.state.borrow_mut();
            if let NodeState::Resolved(_) = &*state {
                tracing::debug!(id = %self.id, "ignoring second resolution of load node");
                return false;
            }
            match std::mem::replace(&mut *state, NodeState::Resolved(value.clone())) {
                NodeState::Pending {
                    subscribers,
                    waiters,
                } => (subscribers, waiters),
                NodeState::Resolved(_) => unreachable!("checked above"),
            }
        };
        for cb in subscribers {
            cb(&value);
        }
        for waiter in waiters {
            let _ = waiter.send(value.clone());
        }
        true
    }

    /// Completes with the value once the node resolves. A node dropped
    /// without resolving yields an empty value.
    pub fn wait_for_load(&self) -> impl Future<Output = LiveAssetData> + 'static {
        let pending = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                NodeState::Resolved(value) => Err(value.clone()),
                NodeState::Pending { waiters, .. } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Ok(rx)
                }
            }
        };
        async move {
            match pending {
                Ok(rx) => rx.await.unwrap_or_default(),
                Err(value) => value,
            }
        }
    }
}
