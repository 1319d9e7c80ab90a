// Document store contract and change feed

mod memory;

pub use memory::{MemoryStore, StoreStats};

use crate::document::{Document, DocumentId};
use crate::error::Result;
use crate::options::{GetOptions, QueryOptions};
use crate::state::QueryResponse;
use std::collections::BTreeSet;
use std::future::Future;
use tokio::sync::broadcast;

/// A replicated document store as seen by the view coordinators.
///
/// Futures are not required to be `Send`: coordinators run them on a
/// single-threaded `LocalSet`.
pub trait DocumentStore {
    /// Point lookup. Fails with `NotFound` for missing or deleted ids.
    fn get(&self, id: &str, options: &GetOptions) -> impl Future<Output = Result<Document>>;

    /// Ranged or keyed listing.
    fn query(&self, options: &QueryOptions) -> impl Future<Output = Result<QueryResponse>>;

    /// Live change feed starting from now.
    fn watch_changes(&self, filter: ChangeFilter) -> ChangeStream;
}

/// One committed write, as emitted on the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub seq: u64,
    pub id: DocumentId,
    pub deleted: bool,
    /// The new revision; absent for deletions.
    pub doc: Option<Document>,
}

/// Which documents a change stream reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ChangeFilter {
    #[default]
    All,
    Ids(BTreeSet<DocumentId>),
}

impl ChangeFilter {
    pub fn ids<I, K>(ids: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<DocumentId>,
    {
        ChangeFilter::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, id: &str) -> bool {
        match self {
            ChangeFilter::All => true,
            ChangeFilter::Ids(ids) => ids.contains(id),
        }
    }
}

/// One item read off a change stream.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(Change),
    /// The stream fell behind and this many changes were lost. Their ids
    /// are unknown, so every consumer has to resync from the store.
    Lagged(u64),
}

/// Filtered receiver over a store's broadcast change feed.
pub struct ChangeStream {
    rx: broadcast::Receiver<Change>,
    filter: ChangeFilter,
}

impl ChangeStream {
    pub fn new(rx: broadcast::Receiver<Change>, filter: ChangeFilter) -> Self {
        ChangeStream { rx, filter }
    }

    /// Next buffered event without waiting. `None` when nothing is queued
    /// or the feed has closed.
    pub fn try_next(&mut self) -> Option<FeedEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(change) => {
                    if self.filter.matches(&change.id) {
                        return Some(FeedEvent::Change(change));
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    log::warn!("Change feed lagged, {n} changes were dropped");
                    return Some(FeedEvent::Lagged(n));
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next matching event. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if self.filter.matches(&change.id) {
                        return Some(FeedEvent::Change(change));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Change feed lagged, {n} changes were dropped");
                    return Some(FeedEvent::Lagged(n));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
