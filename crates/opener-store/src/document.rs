// ── Documents and change notifications ──
//
// Wire-level shapes exchanged with a document store. Bodies stay as raw
// JSON here; decoding into domain entities happens in `opener-core`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document: its store-assigned key plus the raw body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// Classification of a single document change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One document change inside a batch.
///
/// `data` carries the new body for `Added`/`Modified` and the last known
/// body for `Removed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub doc_id: String,
    pub data: Value,
}

/// A batch of changes delivered by a collection watch.
///
/// The first batch of every watch is `initial`: it lists every document
/// that exists when the watch opens, each as `Added`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub changes: Vec<DocumentChange>,
    pub initial: bool,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Equality filter on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, data: &Value) -> bool {
        data.get(&self.field) == Some(&self.value)
    }
}
