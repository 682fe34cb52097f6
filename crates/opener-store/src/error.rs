use thiserror::Error;

/// Top-level error type for the `opener-store` crate.
///
/// Covers every failure a document store can report back to the replica:
/// missing documents, rejected patches, interrupted watches, and I/O while
/// persisting the in-process store.
#[derive(Debug, Error)]
pub enum StoreError {
    // ── Documents ───────────────────────────────────────────────────
    /// The addressed document does not exist.
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// A document body is not a JSON object.
    #[error("Invalid document {collection}/{id}: {reason}")]
    InvalidDocument {
        collection: String,
        id: String,
        reason: String,
    },

    /// A field patch could not be applied.
    #[error("Invalid field patch at '{path}': {reason}")]
    InvalidPatch { path: String, reason: String },

    // ── Watches ─────────────────────────────────────────────────────
    /// The change feed for a collection stopped delivering batches.
    ///
    /// `resumable` tells the consumer whether opening a fresh watch is
    /// expected to work.
    #[error("Watch on '{collection}' interrupted")]
    WatchInterrupted { collection: String, resumable: bool },

    // ── Availability ────────────────────────────────────────────────
    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A transaction was rolled back by the store.
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    // ── Data ────────────────────────────────────────────────────────
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` if a watch that failed with this error can be reopened.
    pub fn is_resumable(&self) -> bool {
        match self {
            Self::WatchInterrupted { resumable, .. } => *resumable,
            Self::Unavailable(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_watch_resumability_follows_flag() {
        let resumable = StoreError::WatchInterrupted {
            collection: "gates".into(),
            resumable: true,
        };
        let terminal = StoreError::WatchInterrupted {
            collection: "gates".into(),
            resumable: false,
        };
        assert!(resumable.is_resumable());
        assert!(!terminal.is_resumable());
    }

    #[test]
    fn unavailable_is_resumable_but_not_found_is_not() {
        assert!(StoreError::Unavailable("down".into()).is_resumable());
        let missing = StoreError::NotFound {
            collection: "phones".into(),
            id: "p1".into(),
        };
        assert!(!missing.is_resumable());
        assert!(missing.is_not_found());
    }
}
