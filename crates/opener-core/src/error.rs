// ── Core error types ──
//
// Errors returned by the command layer and the replica lifecycle.
// Store failures pass through unmodified inside `Store`. Feed failures
// travel on their own channel as `FeedError` (see `feed`) and only show
// up here when one ends a sync wait.

use std::sync::Arc;
use std::time::Duration;

use opener_store::StoreError;
use thiserror::Error;

use crate::feed::FeedError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Command errors ───────────────────────────────────────────────
    /// A phone with this key already exists. Nothing was written.
    #[error("A phone with key {key} already exists")]
    Conflict { key: i64 },

    #[error("{operation} timed out after {}ms", timeout.as_millis())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Replica is already running")]
    AlreadyRunning,

    /// A feed stopped on a terminal error before the replica was synced.
    #[error(transparent)]
    Feed(Arc<FeedError>),

    // ── Wrapped errors ───────────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns `true` if the store reported the target as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_display_unchanged() {
        let inner = StoreError::Unavailable("connection reset".into());
        let expected = inner.to_string();
        let err = CoreError::from(inner);
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn wrapped_not_found_is_detected() {
        let err = CoreError::from(StoreError::NotFound {
            collection: "phones".into(),
            id: "p1".into(),
        });
        assert!(err.is_not_found());
        assert!(!CoreError::Conflict { key: 1 }.is_not_found());
    }

    #[test]
    fn timeout_reports_operation() {
        let err = CoreError::Timeout {
            operation: "create_phone",
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "create_phone timed out after 250ms");
    }
}
