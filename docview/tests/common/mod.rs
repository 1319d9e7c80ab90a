#![allow(dead_code)]

use docview::{
    ChangeFilter, ChangeStream, DocViewError, Document, DocumentStore, GetOptions, MemoryStore,
    QueryOptions, QueryResponse, Result,
};
use std::cell::{Cell, RefCell};
use tokio::sync::oneshot;

enum Outcome {
    Pass,
    Fail(DocViewError),
}

/// Store wrapper that parks every fetch until the test releases it.
pub struct GatedStore {
    pub inner: MemoryStore,
    pending: RefCell<Vec<oneshot::Sender<Outcome>>>,
    issued: Cell<usize>,
    /// Read the store before parking instead of after release.
    snapshot_first: bool,
}

impl GatedStore {
    pub fn new(inner: MemoryStore) -> Self {
        GatedStore {
            inner,
            pending: RefCell::new(Vec::new()),
            issued: Cell::new(0),
            snapshot_first: false,
        }
    }

    /// Gets read the store as soon as they are issued and answer with that
    /// snapshot on release, however the store changed meanwhile.
    pub fn snapshotting(inner: MemoryStore) -> Self {
        GatedStore {
            snapshot_first: true,
            ..Self::new(inner)
        }
    }

    /// Fetches started so far, released or not.
    pub fn issued(&self) -> usize {
        self.issued.get()
    }

    /// Fetches currently parked.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn release_oldest(&self) {
        self.resolve(0, Outcome::Pass);
    }

    pub fn release_newest(&self) {
        let last = self.pending() - 1;
        self.resolve(last, Outcome::Pass);
    }

    pub fn fail_oldest(&self, error: DocViewError) {
        self.resolve(0, Outcome::Fail(error));
    }

    fn resolve(&self, index: usize, outcome: Outcome) {
        let gate = self.pending.borrow_mut().remove(index);
        let _ = gate.send(outcome);
    }

    async fn wait(&self) -> Result<()> {
        self.issued.set(self.issued.get() + 1);
        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().push(tx);
        match rx.await {
            Ok(Outcome::Fail(e)) => Err(e),
            Ok(Outcome::Pass) | Err(_) => Ok(()),
        }
    }
}

impl DocumentStore for GatedStore {
    async fn get(&self, id: &str, options: &GetOptions) -> Result<Document> {
        if self.snapshot_first {
            let snapshot = self.inner.get(id, options).await;
            self.wait().await?;
            return snapshot;
        }
        self.wait().await?;
        self.inner.get(id, options).await
    }

    async fn query(&self, options: &QueryOptions) -> Result<QueryResponse> {
        self.wait().await?;
        self.inner.query(options).await
    }

    fn watch_changes(&self, filter: ChangeFilter) -> ChangeStream {
        self.inner.watch_changes(filter)
    }
}

pub fn store_with(ids: &[&str]) -> MemoryStore {
    seed(MemoryStore::new(), ids)
}

/// Like [`store_with`], with a change feed that lags after `capacity`
/// unread changes.
pub fn store_with_capacity(capacity: usize, ids: &[&str]) -> MemoryStore {
    seed(MemoryStore::with_feed_capacity(capacity), ids)
}

fn seed(store: MemoryStore, ids: &[&str]) -> MemoryStore {
    for id in ids {
        store
            .put(Document::new(*id).with_field("name", *id))
            .unwrap();
    }
    store
}

/// Let spawned local tasks run until they park again.
pub async fn run_pending() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
