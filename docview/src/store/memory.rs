use super::{Change, ChangeFilter, ChangeStream, DocumentStore};
use crate::document::{revision_generation, Attachment, Document, DocumentId};
use crate::error::{DocViewError, Result};
use crate::options::{GetOptions, QueryOptions};
use crate::range;
use crate::state::{QueryResponse, RowEntry, RowValue};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::broadcast;

const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Counters for the fetches a store has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub gets: usize,
    pub queries: usize,
}

struct Revision {
    rev: String,
    deleted: bool,
    doc: Document,
}

/// Revision chain of one document, oldest first.
struct Entry {
    revisions: Vec<Revision>,
}

impl Entry {
    fn leaf(&self) -> &Revision {
        // never empty: entries are created with their first revision
        &self.revisions[self.revisions.len() - 1]
    }

    fn is_live(&self) -> bool {
        !self.leaf().deleted
    }
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<DocumentId, Entry>,
    seq: u64,
}

/// In-memory reference store with revision history and a broadcast
/// change feed. Writes are last-writer-wins.
///
/// Every read yields to the scheduler once before answering, so callers
/// observe a real suspension point as they would with a remote store.
pub struct MemoryStore {
    inner: RefCell<Inner>,
    feed: broadcast::Sender<Change>,
    stats: Cell<StoreStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Create a store whose change feed buffers `capacity` changes per
    /// subscriber before lagging.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity);
        MemoryStore {
            inner: RefCell::new(Inner::default()),
            feed,
            stats: Cell::new(StoreStats::default()),
        }
    }

    /// Seed a store from a YAML list of documents (each with an `_id`).
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let docs: Vec<Document> = serde_yaml::from_str(yaml)?;
        let store = Self::new();
        for doc in docs {
            store.put(doc)?;
        }
        Ok(store)
    }

    /// Seed a store from a YAML file.
    pub fn load_yaml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Write a new revision of `doc`. Attachments of the previous
    /// revision carry over when `doc` brings none.
    pub fn put(&self, mut doc: Document) -> Result<String> {
        let id = doc
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DocViewError::Other("Document has no _id".into()))?;

        let rev = {
            let mut inner = self.inner.borrow_mut();
            let previous = inner.docs.get(&id).map(|entry| entry.leaf());
            let rev = next_rev(previous.map(|r| r.rev.as_str()));

            if doc.attachments.is_empty() {
                if let Some(prev) = previous.filter(|r| !r.deleted) {
                    doc.attachments = prev.doc.attachments.clone();
                }
            }
            doc.rev = Some(rev.clone());
            doc.revisions = None;

            let revision = Revision {
                rev: rev.clone(),
                deleted: false,
                doc: doc.clone(),
            };
            match inner.docs.get_mut(&id) {
                Some(entry) => entry.revisions.push(revision),
                None => {
                    inner.docs.insert(
                        id.clone(),
                        Entry {
                            revisions: vec![revision],
                        },
                    );
                }
            }
            rev
        };

        self.emit(id, false, Some(doc));
        Ok(rev)
    }

    /// Write a tombstone revision for `id`.
    pub fn delete(&self, id: &str) -> Result<String> {
        let rev = {
            let mut inner = self.inner.borrow_mut();
            let entry = inner
                .docs
                .get_mut(id)
                .filter(|entry| entry.is_live())
                .ok_or_else(|| DocViewError::not_found(id))?;

            let rev = next_rev(Some(entry.leaf().rev.as_str()));
            let mut tombstone = Document::new(id);
            tombstone.rev = Some(rev.clone());
            entry.revisions.push(Revision {
                rev: rev.clone(),
                deleted: true,
                doc: tombstone,
            });
            rev
        };

        self.emit(id.to_string(), true, None);
        Ok(rev)
    }

    /// Add or replace an attachment on a live document.
    pub fn put_attachment(
        &self,
        id: &str,
        name: &str,
        content_type: &str,
        data: &str,
    ) -> Result<String> {
        let mut doc = {
            let inner = self.inner.borrow();
            inner
                .docs
                .get(id)
                .filter(|entry| entry.is_live())
                .map(|entry| entry.leaf().doc.clone())
                .ok_or_else(|| DocViewError::not_found(id))?
        };
        doc.attachments
            .insert(name.to_string(), Attachment::new(content_type, data));
        self.put(doc)
    }

    /// Number of live (non-deleted) documents.
    pub fn len(&self) -> usize {
        self.inner
            .borrow()
            .docs
            .values()
            .filter(|entry| entry.is_live())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number of the last committed write.
    pub fn update_seq(&self) -> u64 {
        self.inner.borrow().seq
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.get()
    }

    fn emit(&self, id: DocumentId, deleted: bool, doc: Option<Document>) {
        let seq = {
            let mut inner = self.inner.borrow_mut();
            inner.seq += 1;
            inner.seq
        };
        // no receivers is fine: nobody is watching yet
        let _ = self.feed.send(Change {
            seq,
            id,
            deleted,
            doc,
        });
    }

    fn record(&self, f: impl FnOnce(&mut StoreStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn lookup(&self, id: &str, options: &GetOptions) -> Result<Document> {
        let inner = self.inner.borrow();
        let entry = inner
            .docs
            .get(id)
            .ok_or_else(|| DocViewError::not_found(id))?;

        let position = match &options.rev {
            Some(_) if options.latest => entry.revisions.len() - 1,
            Some(rev) => entry
                .revisions
                .iter()
                .position(|r| &r.rev == rev)
                .ok_or_else(|| DocViewError::not_found(id))?,
            None => entry.revisions.len() - 1,
        };

        let revision = &entry.revisions[position];
        if revision.deleted {
            return Err(DocViewError::not_found(id));
        }

        let mut doc = materialize(&revision.doc, options.attachments);
        if options.revs {
            doc.revisions = Some(
                entry.revisions[..=position]
                    .iter()
                    .rev()
                    .map(|r| r.rev.clone())
                    .collect(),
            );
        }
        Ok(doc)
    }

    fn list(&self, options: &QueryOptions) -> QueryResponse {
        let inner = self.inner.borrow();

        let selected: Vec<(&str, &Entry)> = if let Some(key) = &options.key {
            live(&inner.docs, key).map(|entry| (key.as_str(), entry)).into_iter().collect()
        } else if let Some(keys) = &options.keys {
            keys.iter()
                .filter_map(|key| live(&inner.docs, key).map(|entry| (key.as_str(), entry)))
                .collect()
        } else {
            let in_range = |(id, entry): &(&str, &Entry)| {
                entry.is_live()
                    && range::could_affect(
                        id,
                        options.start_key.as_deref(),
                        options.end_key.as_deref(),
                        options.inclusive_end,
                        options.descending,
                    )
            };
            let all = inner.docs.iter().map(|(id, entry)| (id.as_str(), entry));
            if options.descending {
                all.rev().filter(in_range).collect()
            } else {
                all.filter(in_range).collect()
            }
        };

        let rows = selected
            .into_iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX))
            .map(|(id, entry)| {
                let leaf = entry.leaf();
                RowEntry {
                    id: id.to_string(),
                    key: id.to_string(),
                    value: RowValue {
                        rev: leaf.rev.clone(),
                    },
                    doc: options
                        .include_docs
                        .then(|| materialize(&leaf.doc, options.attachments)),
                }
            })
            .collect();

        QueryResponse {
            rows,
            total_count: inner.docs.values().filter(|entry| entry.is_live()).count(),
            offset: options.skip,
            update_seq: options.update_seq.then_some(inner.seq),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str, options: &GetOptions) -> Result<Document> {
        tokio::task::yield_now().await;
        self.record(|stats| stats.gets += 1);
        self.lookup(id, options)
    }

    async fn query(&self, options: &QueryOptions) -> Result<QueryResponse> {
        tokio::task::yield_now().await;
        self.record(|stats| stats.queries += 1);
        Ok(self.list(options))
    }

    fn watch_changes(&self, filter: ChangeFilter) -> ChangeStream {
        ChangeStream::new(self.feed.subscribe(), filter)
    }
}

fn live<'a>(docs: &'a BTreeMap<DocumentId, Entry>, id: &str) -> Option<&'a Entry> {
    docs.get(id).filter(|entry| entry.is_live())
}

fn materialize(doc: &Document, with_attachment_bodies: bool) -> Document {
    if with_attachment_bodies {
        doc.clone()
    } else {
        doc.clone().without_attachment_bodies()
    }
}

fn next_rev(previous: Option<&str>) -> String {
    let generation = previous.and_then(revision_generation).unwrap_or(0) + 1;
    format!("{generation}-{}", uuid::Uuid::new_v4().simple())
}
