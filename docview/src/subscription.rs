// Subscription multiplexer - fans one change feed out to many views

use crate::document::DocumentId;
use crate::store::{Change, ChangeStream, FeedEvent};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::{Rc, Weak};

/// What a listener is told.
#[derive(Debug, Clone, Copy)]
pub enum Notification<'a> {
    Change(&'a Change),
    /// Changes were lost upstream. The listener must reload from the store.
    Resync,
}

type Listener = Rc<dyn Fn(Notification<'_>)>;

struct Registration {
    ids: Option<BTreeSet<DocumentId>>,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    registrations: BTreeMap<u64, Registration>,
    /// Listeners scoped to specific ids.
    by_doc: HashMap<DocumentId, BTreeSet<u64>>,
    /// Listeners that want every document.
    everything: BTreeSet<u64>,
}

impl Registry {
    fn insert(&mut self, ids: Option<BTreeSet<DocumentId>>, listener: Listener) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        match &ids {
            Some(ids) => {
                for doc_id in ids {
                    self.by_doc.entry(doc_id.clone()).or_default().insert(id);
                }
            }
            None => {
                self.everything.insert(id);
            }
        }
        self.registrations.insert(id, Registration { ids, listener });
        id
    }

    fn remove(&mut self, id: u64) {
        let Some(registration) = self.registrations.remove(&id) else {
            return;
        };
        match registration.ids {
            Some(ids) => {
                for doc_id in ids {
                    if let Some(set) = self.by_doc.get_mut(&doc_id) {
                        set.remove(&id);
                        if set.is_empty() {
                            self.by_doc.remove(&doc_id);
                        }
                    }
                }
            }
            None => {
                self.everything.remove(&id);
            }
        }
    }

    /// Registration ids interested in `doc_id`, in registration order.
    fn targets(&self, doc_id: &str) -> BTreeSet<u64> {
        let mut targets = self.everything.clone();
        if let Some(scoped) = self.by_doc.get(doc_id) {
            targets.extend(scoped.iter().copied());
        }
        targets
    }
}

/// Routes store changes to registered listeners, either for a fixed id
/// set or for every document.
///
/// Listeners run synchronously on the dispatching task. A listener that
/// is unsubscribed mid-dispatch (even by another listener) is not called
/// afterwards.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    registry: Rc<RefCell<Registry>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `on_event` for changes to `ids`, or to all documents when
    /// `ids` is `None`. The registration lives as long as the returned
    /// handle.
    pub fn subscribe_to_docs<F>(&self, ids: Option<BTreeSet<DocumentId>>, on_event: F) -> Subscription
    where
        F: Fn(Notification<'_>) + 'static,
    {
        let id = self.registry.borrow_mut().insert(ids, Rc::new(on_event));
        Subscription {
            registry: Rc::downgrade(&self.registry),
            id: Some(id),
        }
    }

    /// Deliver one change. Returns how many listeners were called.
    pub fn notify(&self, change: &Change) -> usize {
        let targets = self.registry.borrow().targets(&change.id);
        self.dispatch(targets, Notification::Change(change))
    }

    /// Tell every listener, scoped or not, to reload from the store.
    pub fn resync(&self) -> usize {
        let targets = self.registry.borrow().registrations.keys().copied().collect();
        self.dispatch(targets, Notification::Resync)
    }

    fn dispatch(&self, targets: BTreeSet<u64>, notification: Notification<'_>) -> usize {
        let mut delivered = 0;
        for target in targets {
            let listener = self
                .registry
                .borrow()
                .registrations
                .get(&target)
                .map(|r| Rc::clone(&r.listener));
            if let Some(listener) = listener {
                listener(notification);
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver(&self, event: FeedEvent) {
        match event {
            FeedEvent::Change(change) => {
                let delivered = self.notify(&change);
                log::trace!(
                    "Delivered change {} for {} to {delivered} listeners",
                    change.seq,
                    change.id
                );
            }
            FeedEvent::Lagged(missed) => {
                let delivered = self.resync();
                log::debug!("Feed lost {missed} changes, resyncing {delivered} listeners");
            }
        }
    }

    /// Deliver every event already queued on `feed` without waiting.
    /// Returns how many changes were read.
    pub fn drain(&self, feed: &mut ChangeStream) -> usize {
        let mut changes = 0;
        while let Some(event) = feed.try_next() {
            if matches!(event, FeedEvent::Change(_)) {
                changes += 1;
            }
            self.deliver(event);
        }
        changes
    }

    /// Deliver events from `feed` as they arrive until the store closes
    /// the feed. Meant to be spawned as a local task.
    pub async fn pump(&self, mut feed: ChangeStream) {
        while let Some(event) = feed.next().await {
            self.deliver(event);
        }
        log::debug!("Change feed closed, multiplexer stopping");
    }

    pub fn listener_count(&self) -> usize {
        self.registry.borrow().registrations.len()
    }
}

/// Handle owning one multiplexer registration. Released exactly once,
/// explicitly via [`Subscription::unsubscribe`] or on drop.
pub struct Subscription {
    registry: Weak<RefCell<Registry>>,
    id: Option<u64>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            if let Some(registry) = self.registry.upgrade() {
                registry.borrow_mut().remove(id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
