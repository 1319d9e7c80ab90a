use thiserror::Error;

/// Errors produced by stores and surfaced in view state.
///
/// Every variant is cloneable so a failure can be kept in `ViewState`
/// next to the last good rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocViewError {
    #[error("Document not found: {id}")]
    NotFound { id: String },

    #[error("IO error: {0}")]
    Io(String),

    /// Internal: a commit was attempted by a torn-down coordinator.
    #[error("Cancelled")]
    Cancelled,

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("{0}")]
    Other(String),
}

impl DocViewError {
    pub fn not_found(id: impl Into<String>) -> Self {
        DocViewError::NotFound { id: id.into() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DocViewError::Cancelled)
    }
}

impl From<std::io::Error> for DocViewError {
    fn from(e: std::io::Error) -> Self {
        DocViewError::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for DocViewError {
    fn from(e: serde_yaml::Error) -> Self {
        DocViewError::Yaml(e.to_string())
    }
}

impl From<serde_json::Error> for DocViewError {
    fn from(e: serde_json::Error) -> Self {
        DocViewError::Json(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DocViewError>;
