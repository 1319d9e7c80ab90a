// Document model - identity metadata plus an opaque JSON body

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type DocumentId = String;

/// A stored document.
///
/// `_id` and `_rev` are optional so caller-supplied placeholder values can
/// be represented; views fill them in with [`Document::shaped`] before
/// publishing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub attachments: BTreeMap<String, Attachment>,
    /// Revision history, newest first. Only present when requested.
    #[serde(rename = "_revisions", default, skip_serializing_if = "Option::is_none")]
    pub revisions: Option<Vec<String>>,
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Document {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Build a document from a JSON object body. Non-object values are
    /// stored under a `value` field.
    pub fn from_value(id: impl Into<DocumentId>, value: serde_json::Value) -> Self {
        let data = match value {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        Document {
            id: Some(id.into()),
            data,
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(name.to_string(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.data.get(name)
    }

    /// The document id, or `""` when unset.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    /// The revision token, or `""` when unset.
    pub fn rev(&self) -> &str {
        self.rev.as_deref().unwrap_or("")
    }

    /// Numeric generation prefix of the revision token (`3-abc` -> 3).
    pub fn generation(&self) -> Option<u64> {
        revision_generation(self.rev())
    }

    /// Guarantee identifying metadata: fill a missing id from `id` and
    /// default a missing revision to the empty token.
    pub fn shaped(mut self, id: &str) -> Self {
        if self.id.is_none() {
            self.id = Some(id.to_string());
        }
        if self.rev.is_none() {
            self.rev = Some(String::new());
        }
        self
    }

    /// Replace every attachment with its metadata-only stub.
    pub fn without_attachment_bodies(mut self) -> Self {
        for attachment in self.attachments.values_mut() {
            *attachment = attachment.stubbed();
        }
        self
    }
}

/// Parse the generation number out of a `<n>-<hash>` revision token.
pub fn revision_generation(rev: &str) -> Option<u64> {
    rev.split_once('-').and_then(|(n, _)| n.parse().ok())
}

/// Binary attachment metadata. `data` is only present when the caller
/// asked for attachment bodies; otherwise `stub` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub content_type: String,
    pub digest: String,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stub: bool,
}

impl Attachment {
    pub fn new(content_type: &str, data: &str) -> Self {
        Attachment {
            content_type: content_type.to_string(),
            digest: digest(data),
            length: data.len(),
            data: Some(data.to_string()),
            stub: false,
        }
    }

    /// Metadata-only copy without the body.
    pub fn stubbed(&self) -> Self {
        Attachment {
            data: None,
            stub: true,
            ..self.clone()
        }
    }
}

fn digest(data: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("h-{:016x}", hasher.finish())
}
