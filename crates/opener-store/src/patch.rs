// ── Field-level document patches ──
//
// A `FieldPatch` is an ordered list of per-path updates. Only the paths
// listed are touched; everything else in the document is left alone.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StoreError;

/// The operation applied at a single field path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "camelCase")]
pub enum FieldValue {
    /// Overwrite the field.
    Set(Value),
    /// Append each element not already present. A non-array field is
    /// replaced by an array holding exactly these elements.
    ArrayUnion(Vec<Value>),
    /// Remove every instance of each element. A non-array field is
    /// replaced by an empty array.
    ArrayRemove(Vec<Value>),
    /// Replace the field with the store's commit time.
    ServerTimestamp,
    /// Remove the field.
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldUpdate {
    pub path: String,
    #[serde(flatten)]
    pub value: FieldValue,
}

/// Ordered set of field updates sent to [`update_fields`].
///
/// Paths are dotted (`"activation.when"`) to address nested fields.
///
/// [`update_fields`]: crate::DocumentStore::update_fields
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldPatch {
    updates: Vec<FieldUpdate>,
}

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(path, FieldValue::Set(value.into()))
    }

    #[must_use]
    pub fn array_union(self, path: impl Into<String>, items: Vec<Value>) -> Self {
        self.push(path, FieldValue::ArrayUnion(items))
    }

    #[must_use]
    pub fn array_remove(self, path: impl Into<String>, items: Vec<Value>) -> Self {
        self.push(path, FieldValue::ArrayRemove(items))
    }

    #[must_use]
    pub fn server_timestamp(self, path: impl Into<String>) -> Self {
        self.push(path, FieldValue::ServerTimestamp)
    }

    #[must_use]
    pub fn delete(self, path: impl Into<String>) -> Self {
        self.push(path, FieldValue::Delete)
    }

    #[must_use]
    pub fn push(mut self, path: impl Into<String>, value: FieldValue) -> Self {
        self.updates.push(FieldUpdate {
            path: path.into(),
            value,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn updates(&self) -> &[FieldUpdate] {
        &self.updates
    }

    /// Dotted paths touched by this patch, in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.updates.iter().map(|u| u.path.as_str())
    }

    /// Apply every update to `doc` in order, stamping server timestamps
    /// with `now`.
    pub fn apply_to(&self, doc: &mut Value, now: DateTime<Utc>) -> Result<(), StoreError> {
        for update in &self.updates {
            apply_update(doc, update, now)?;
        }
        Ok(())
    }
}

fn apply_update(doc: &mut Value, update: &FieldUpdate, now: DateTime<Utc>) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidPatch {
        path: update.path.clone(),
        reason: reason.into(),
    };

    let mut segments: Vec<&str> = update.path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid("empty path segment"));
    }
    let Some(leaf) = segments.pop() else {
        return Err(invalid("empty path"));
    };

    let mut target = doc
        .as_object_mut()
        .ok_or_else(|| invalid("document is not an object"))?;
    for segment in segments {
        let next = target
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !next.is_object() {
            return Err(invalid("intermediate field is not an object"));
        }
        target = next
            .as_object_mut()
            .ok_or_else(|| invalid("intermediate field is not an object"))?;
    }

    match &update.value {
        FieldValue::Set(value) => {
            target.insert(leaf.to_owned(), value.clone());
        }
        FieldValue::Delete => {
            target.remove(leaf);
        }
        FieldValue::ServerTimestamp => {
            let stamp = now.to_rfc3339_opts(SecondsFormat::Micros, true);
            target.insert(leaf.to_owned(), Value::String(stamp));
        }
        FieldValue::ArrayUnion(items) => {
            let field = target
                .entry(leaf.to_owned())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !field.is_array() {
                *field = Value::Array(Vec::new());
            }
            if let Value::Array(existing) = field {
                for item in items {
                    if !existing.contains(item) {
                        existing.push(item.clone());
                    }
                }
            }
        }
        FieldValue::ArrayRemove(items) => {
            let field = target
                .entry(leaf.to_owned())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(existing) = field {
                existing.retain(|v| !items.contains(v));
            } else {
                *field = Value::Array(Vec::new());
            }
        }
    }
    Ok(())
}
