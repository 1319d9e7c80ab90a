use docview::{Document, MemoryStore, Result};
use serde::Deserialize;
use std::path::Path;

/// One write replayed against the store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Put(Document),
    Delete(String),
    Attach {
        id: String,
        name: String,
        #[serde(default = "default_content_type")]
        content_type: String,
        data: String,
    },
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

impl Step {
    /// Apply the write and describe it for the output.
    pub fn apply(&self, store: &MemoryStore) -> Result<String> {
        match self {
            Step::Put(doc) => {
                let rev = store.put(doc.clone())?;
                Ok(format!("put {} -> {rev}", doc.id()))
            }
            Step::Delete(id) => {
                let rev = store.delete(id)?;
                Ok(format!("delete {id} -> {rev}"))
            }
            Step::Attach {
                id,
                name,
                content_type,
                data,
            } => {
                let rev = store.put_attachment(id, name, content_type, data)?;
                Ok(format!("attach {id}/{name} -> {rev}"))
            }
        }
    }
}

/// Read a YAML list of steps. A missing path means no steps.
pub fn load_script(path: Option<&Path>) -> Result<Vec<Step>> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&content)?)
        }
        None => Ok(Vec::new()),
    }
}
