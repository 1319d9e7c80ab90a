use crate::document::DocumentId;
use crate::range;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn default_true() -> bool {
    true
}

/// Options for a ranged listing. Two values that compare equal describe
/// the same view identity; any field change means a fresh view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub start_key: Option<String>,
    #[serde(default)]
    pub end_key: Option<String>,
    #[serde(default = "default_true")]
    pub inclusive_end: bool,
    /// Exact single key. Takes precedence over the key range.
    #[serde(default)]
    pub key: Option<DocumentId>,
    /// Exact key set, returned in the given order.
    #[serde(default)]
    pub keys: Option<Vec<DocumentId>>,
    #[serde(default)]
    pub descending: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub include_docs: bool,
    #[serde(default)]
    pub attachments: bool,
    #[serde(default)]
    pub update_seq: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            start_key: None,
            end_key: None,
            inclusive_end: true,
            key: None,
            keys: None,
            descending: false,
            limit: None,
            skip: 0,
            include_docs: false,
            attachments: false,
            update_seq: false,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(start_key: &str, end_key: &str) -> Self {
        QueryOptions {
            start_key: Some(start_key.to_string()),
            end_key: Some(end_key.to_string()),
            ..Default::default()
        }
    }

    pub fn start_key(mut self, key: &str) -> Self {
        self.start_key = Some(key.to_string());
        self
    }

    pub fn end_key(mut self, key: &str) -> Self {
        self.end_key = Some(key.to_string());
        self
    }

    pub fn inclusive_end(mut self, inclusive: bool) -> Self {
        self.inclusive_end = inclusive;
        self
    }

    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<DocumentId>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn include_docs(mut self, include: bool) -> Self {
        self.include_docs = include;
        self
    }

    pub fn attachments(mut self, include: bool) -> Self {
        self.attachments = include;
        self
    }

    pub fn update_seq(mut self, include: bool) -> Self {
        self.update_seq = include;
        self
    }

    /// Ids the view needs change events for. `None` means every document,
    /// since an open range can admit any id.
    pub fn subscription_ids(&self) -> Option<BTreeSet<DocumentId>> {
        if let Some(key) = &self.key {
            Some(BTreeSet::from([key.clone()]))
        } else {
            self.keys
                .as_ref()
                .map(|keys| keys.iter().cloned().collect())
        }
    }

    /// Whether a change to `id` could alter this listing. Keyed listings
    /// ignore the key range, as the store does.
    pub fn could_affect(&self, id: &str) -> bool {
        if let Some(ids) = self.subscription_ids() {
            return ids.contains(id);
        }
        range::could_affect(
            id,
            self.start_key.as_deref(),
            self.end_key.as_deref(),
            self.inclusive_end,
            self.descending,
        )
    }
}

/// Options for a point lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GetOptions {
    /// Fetch this specific revision instead of the current one.
    #[serde(default)]
    pub rev: Option<String>,
    /// Include the revision history as `_revisions`.
    #[serde(default)]
    pub revs: bool,
    /// With `rev`, return the current leaf if `rev` has been superseded.
    #[serde(default)]
    pub latest: bool,
    /// Include attachment bodies instead of stubs.
    #[serde(default)]
    pub attachments: bool,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rev(mut self, rev: &str) -> Self {
        self.rev = Some(rev.to_string());
        self
    }

    pub fn revs(mut self, include: bool) -> Self {
        self.revs = include;
        self
    }

    pub fn latest(mut self, latest: bool) -> Self {
        self.latest = latest;
        self
    }

    pub fn attachments(mut self, include: bool) -> Self {
        self.attachments = include;
        self
    }

    /// History and pinned revisions are only known to the store, so a
    /// change-feed payload cannot stand in for a lookup with these set.
    pub(crate) fn needs_store_lookup(&self) -> bool {
        self.revs || self.rev.is_some()
    }
}
