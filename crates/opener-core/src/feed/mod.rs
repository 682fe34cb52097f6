// ── Change feed ──
//
// Typed, ordered events produced from a store collection watch. One
// `FeedAdapter` runs per collection and forwards `FeedMessage`s to the
// repository over an `mpsc` channel; failures go out separately on a
// `broadcast` channel of `FeedError`.

mod adapter;

use opener_store::StoreError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Gate, Phone};

pub use adapter::FeedAdapter;
pub use opener_store::ChangeKind;

/// One classified document change.
///
/// `entity` is present for `Added` and `Modified` and absent for
/// `Removed`. `id` is always the store's document key.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub id: String,
    pub entity: Option<T>,
}

impl<T> ChangeEvent<T> {
    pub fn added(id: impl Into<String>, entity: T) -> Self {
        Self {
            kind: ChangeKind::Added,
            id: id.into(),
            entity: Some(entity),
        }
    }

    pub fn modified(id: impl Into<String>, entity: T) -> Self {
        Self {
            kind: ChangeKind::Modified,
            id: id.into(),
            entity: Some(entity),
        }
    }

    pub fn removed(id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            id: id.into(),
            entity: None,
        }
    }
}

/// What a feed sends to the repository.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage<T> {
    Change(ChangeEvent<T>),
    /// Sent after the initial snapshot of every watch. `ids` lists every
    /// document the store reported as present at that point.
    Synced { ids: Vec<String> },
}

/// Errors published on a replica's error channel.
#[derive(Debug, Error)]
pub enum FeedError {
    /// A document body did not decode. No event was emitted for it.
    #[error("Cannot decode {collection}/{id}: {source}")]
    Decode {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Watch on '{collection}' failed: {source}")]
    Store {
        collection: String,
        #[source]
        source: StoreError,
    },

    /// The store ended the watch without reporting an error.
    #[error("Watch on '{collection}' closed by the store")]
    Closed { collection: String },
}

impl FeedError {
    pub fn collection(&self) -> &str {
        match self {
            Self::Decode { collection, .. }
            | Self::Store { collection, .. }
            | Self::Closed { collection } => collection,
        }
    }
}

/// Decoding a raw document body into an entity.
///
/// The store key is attached after decoding, replacing any `id` the body
/// may carry.
pub trait Decode: DeserializeOwned + Send + Sync + 'static {
    fn set_id(&mut self, id: String);

    fn decode(id: &str, data: &Value) -> Result<Self, serde_json::Error> {
        let mut entity = Self::deserialize(data)?;
        entity.set_id(id.to_owned());
        Ok(entity)
    }
}

impl Decode for Gate {
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Decode for Phone {
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_takes_id_from_store_key() {
        let gate = Gate::decode("g-store", &json!({ "id": "g-body", "name": "front" })).unwrap();
        assert_eq!(gate.id, "g-store");
        assert_eq!(gate.name, "front");
    }

    #[test]
    fn decode_rejects_wrong_types() {
        assert!(Phone::decode("p1", &json!({ "key": "forty-two" })).is_err());
        assert!(Phone::decode("p1", &json!("not an object")).is_err());
    }
}
