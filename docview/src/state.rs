use crate::document::{Document, DocumentId};
use crate::error::DocViewError;
use serde::{Deserialize, Serialize};

/// Fetch status of a view. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    #[default]
    Loading,
    Done,
    Error,
}

/// Per-row value reported by a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowValue {
    pub rev: String,
}

/// One entry of a ranged listing, in store order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEntry {
    pub id: DocumentId,
    pub key: String,
    pub value: RowValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
}

/// Result of a ranged store query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub rows: Vec<RowEntry>,
    pub total_count: usize,
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_seq: Option<u64>,
}

/// Live state of a ranged view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewState {
    pub rows: Vec<RowEntry>,
    pub total_count: usize,
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_seq: Option<u64>,
    pub query_state: QueryState,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<DocViewError>,
}

impl ViewState {
    pub fn loading(&self) -> bool {
        self.query_state == QueryState::Loading
    }

    pub fn ids(&self) -> Vec<&str> {
        self.rows.iter().map(|row| row.id.as_str()).collect()
    }

    /// Replace the rows with a fresh query result.
    pub(crate) fn apply_response(&mut self, response: QueryResponse) {
        self.rows = response.rows;
        self.total_count = response.total_count;
        self.offset = response.offset;
        self.update_seq = response.update_seq;
        self.query_state = QueryState::Done;
        self.error = None;
    }

    /// Mark the view failed. Rows from the last good fetch stay in place.
    pub(crate) fn apply_error(&mut self, error: DocViewError) {
        self.query_state = QueryState::Error;
        self.error = Some(error);
    }

    /// Drop the row for a deleted document. Returns how many rows went
    /// away (0 or 1); `total_count` shrinks by the same amount.
    pub(crate) fn remove_row(&mut self, id: &str) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| row.id != id);
        let removed = before - self.rows.len();
        self.total_count = self.total_count.saturating_sub(removed);
        removed
    }
}

/// Live state of a single-document view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentViewState {
    pub doc: Option<Document>,
    pub query_state: QueryState,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<DocViewError>,
    /// Set when the change feed reported the document deleted. `doc`
    /// keeps the last known revision.
    pub deleted: bool,
}

impl DocumentViewState {
    pub fn loading(&self) -> bool {
        self.query_state == QueryState::Loading
    }
}

fn serialize_error<S>(error: &Option<DocViewError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> RowEntry {
        RowEntry {
            id: id.to_string(),
            key: id.to_string(),
            value: RowValue { rev: "1-x".into() },
            doc: None,
        }
    }

    #[test]
    fn test_remove_row_present() {
        let mut state = ViewState {
            rows: vec![row("a"), row("c"), row("k")],
            total_count: 3,
            ..Default::default()
        };
        assert_eq!(state.remove_row("c"), 1);
        assert_eq!(state.ids(), vec!["a", "k"]);
        assert_eq!(state.total_count, 2);
    }

    #[test]
    fn test_remove_row_absent() {
        let mut state = ViewState {
            rows: vec![row("a")],
            total_count: 5,
            ..Default::default()
        };
        assert_eq!(state.remove_row("zz"), 0);
        assert_eq!(state.total_count, 5);
    }

    #[test]
    fn test_error_keeps_rows() {
        let mut state = ViewState::default();
        state.apply_response(QueryResponse {
            rows: vec![row("a")],
            total_count: 1,
            offset: 0,
            update_seq: None,
        });
        assert_eq!(state.query_state, QueryState::Done);

        state.apply_error(DocViewError::Io("disk".into()));
        assert_eq!(state.query_state, QueryState::Error);
        assert_eq!(state.ids(), vec!["a"]);
        assert!(!state.loading());
    }

    #[test]
    fn test_state_serializes_error_as_message() {
        let state = DocumentViewState {
            error: Some(DocViewError::not_found("x")),
            query_state: QueryState::Error,
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["error"], serde_json::json!("Document not found: x"));
        assert_eq!(json["query_state"], serde_json::json!("error"));
    }
}
