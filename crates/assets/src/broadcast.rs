//! Listener bookkeeping for live-asset change and replacement notifications.

use crate::handler::LiveAssetData;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handle returned when registering a listener, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

thread_local! {
    static NEXT_LISTENER_ID: Cell<u64> = const { Cell::new(1) };
}

impl ListenerId {
    fn next() -> Self {
        NEXT_LISTENER_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            Self(id)
        })
    }
}

/// An ordered set of callbacks taking `&A`.
///
/// Callbacks run in registration order against a snapshot of the set, so a
/// callback may add or remove listeners without affecting the current
/// notification.
pub struct Listeners<A: ?Sized> {
    entries: RefCell<Vec<(ListenerId, Rc<dyn Fn(&A)>)>>,
}

impl<A: ?Sized> Default for Listeners<A> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }
}

impl<A: ?Sized> Listeners<A> {
    pub fn add(&self, cb: Rc<dyn Fn(&A)>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.borrow_mut().push((id, cb));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    pub fn notify(&self, arg: &A) {
        let snapshot: Vec<_> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for cb in snapshot {
            cb(arg);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

/// Per-record notifications about the live asset being rebuilt or torn down.
///
/// - change listeners fire after every successful load with the new data, and
///   on destroy with an empty payload;
/// - replacement listeners fire only on destroy, as a one-shot "reload me"
///   signal for dependents.
#[derive(Default)]
pub struct ReplacementBroadcaster {
    change: Listeners<LiveAssetData>,
    replacement: Listeners<()>,
}

impl ReplacementBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_live_asset_data_change(&self, cb: impl Fn(&LiveAssetData) + 'static) -> ListenerId {
        self.change.add(Rc::new(cb))
    }

    pub(crate) fn on_live_asset_data_change_rc(&self, cb: Rc<dyn Fn(&LiveAssetData)>) -> ListenerId {
        self.change.add(cb)
    }

    pub fn remove_on_live_asset_data_change(&self, id: ListenerId) -> bool {
        self.change.remove(id)
    }

    pub fn on_live_asset_needs_replacement(&self, cb: impl Fn() + 'static) -> ListenerId {
        self.replacement.add(Rc::new(move |_: &()| cb()))
    }

    pub fn remove_on_live_asset_needs_replacement(&self, id: ListenerId) -> bool {
        self.replacement.remove(id)
    }

    pub(crate) fn notify_loaded(&self, data: &LiveAssetData) {
        self.change.notify(data);
    }

    pub(crate) fn notify_destroyed(&self) {
        self.change.notify(&LiveAssetData::empty());
        self.replacement.notify(&());
    }

    pub fn listener_count(&self) -> usize {
        self.change.len() + self.replacement.len()
    }

    pub(crate) fn clear(&self) {
        self.change.clear();
        self.replacement.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ParsedAsset;

    #[test]
    fn change_listeners_see_loads_and_destroys() {
        let broadcaster = ReplacementBroadcaster::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        broadcaster.on_live_asset_data_change(move |data| sink.borrow_mut().push(data.is_empty()));

        broadcaster.notify_loaded(&LiveAssetData::from(ParsedAsset::new(1u8)));
        broadcaster.notify_destroyed();

        assert_eq!(*seen.borrow(), vec![false, true]);
    }

    #[test]
    fn replacement_fires_only_on_destroy() {
        let broadcaster = ReplacementBroadcaster::new();
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        broadcaster.on_live_asset_needs_replacement(move || counter.set(counter.get() + 1));

        broadcaster.notify_loaded(&LiveAssetData::from(ParsedAsset::new(1u8)));
        assert_eq!(count.get(), 0);
        broadcaster.notify_destroyed();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn removed_listener_stops_firing() {
        let broadcaster = ReplacementBroadcaster::new();
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        let id = broadcaster.on_live_asset_needs_replacement(move || counter.set(counter.get() + 1));

        assert!(broadcaster.remove_on_live_asset_needs_replacement(id));
        assert!(!broadcaster.remove_on_live_asset_needs_replacement(id));
        broadcaster.notify_destroyed();
        assert_eq!(count.get(), 0);
        assert_eq!(broadcaster.listener_count(), 0);
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let listeners: Rc<Listeners<u32>> = Rc::new(Listeners::default());
        let own_id = Rc::new(Cell::new(None));
        let calls = Rc::new(Cell::new(0));

        let (set, id_slot, counter) = (Rc::clone(&listeners), Rc::clone(&own_id), Rc::clone(&calls));
        let id = listeners.add(Rc::new(move |_: &u32| {
            counter.set(counter.get() + 1);
            if let Some(id) = id_slot.get() {
                set.remove(id);
            }
        }));
        own_id.set(Some(id));

        listeners.notify(&1);
        listeners.notify(&2);
        assert_eq!(calls.get(), 1);
        assert!(listeners.is_empty());
    }
}
