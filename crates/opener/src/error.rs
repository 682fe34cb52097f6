//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use opener_config::ConfigError;
use opener_core::{CoreError, FeedError};
use opener_store::StoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const STORE: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(opener::not_found),
        help("Run: opener {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{resource_type} '{identifier}' already exists")]
    #[diagnostic(code(opener::conflict))]
    Conflict {
        resource_type: String,
        identifier: String,
    },

    // ── Store ────────────────────────────────────────────────────────
    #[error("Store error: {0}")]
    #[diagnostic(
        code(opener::store),
        help("Check that the store file is readable and holds a JSON object of collections.")
    )]
    Store(#[from] StoreError),

    #[error("Feed for '{collection}' failed")]
    #[diagnostic(
        code(opener::feed_failed),
        help("The '{collection}' feed stopped. Run with -vv for details.")
    )]
    FeedFailed {
        collection: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(opener::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(opener::config),
        help("Inspect the resolved configuration with: opener config show")
    )]
    Config(#[from] ConfigError),

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(code(opener::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("{operation} timed out after {millis}ms")]
    #[diagnostic(
        code(opener::timeout),
        help("Increase the timeout with --timeout or check the store.")
    )]
    Timeout { operation: String, millis: u128 },

    #[error("Write was accepted but never showed up in the replica: {what}")]
    #[diagnostic(
        code(opener::unconfirmed),
        help("The store may still apply it. Re-run the matching list command to check.")
    )]
    Unconfirmed { what: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    #[diagnostic(code(opener::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(opener::json), help("Check the JSON file contents and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } | Self::Unconfirmed { .. } => exit_code::TIMEOUT,
            Self::Store(_) | Self::FeedFailed { .. } => exit_code::STORE,
            Self::Validation { .. } | Self::Config(_) | Self::ConfigExists { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

fn list_command(entity_type: &str) -> String {
    format!("{entity_type}s list")
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Conflict { key } => CliError::Conflict {
                resource_type: "phone key".into(),
                identifier: key.to_string(),
            },

            CoreError::Timeout { operation, timeout } => CliError::Timeout {
                operation: operation.into(),
                millis: timeout.as_millis(),
            },

            CoreError::Store(StoreError::NotFound { collection, id }) => {
                let entity_type = collection.trim_end_matches('s').to_owned();
                CliError::NotFound {
                    list_command: list_command(&entity_type),
                    resource_type: entity_type,
                    identifier: id,
                }
            }

            CoreError::Store(e) => CliError::Store(e),

            CoreError::Serialization(e) => CliError::Json(e),

            CoreError::Feed(err) => CliError::from(err),

            err @ CoreError::AlreadyRunning => CliError::Internal(err.to_string()),
        }
    }
}

impl From<std::sync::Arc<FeedError>> for CliError {
    fn from(err: std::sync::Arc<FeedError>) -> Self {
        CliError::FeedFailed {
            collection: err.collection().to_owned(),
            source: err.to_string().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let conflict: CliError = CoreError::Conflict { key: 7 }.into();
        assert_eq!(conflict.exit_code(), exit_code::CONFLICT);

        let timeout: CliError = CoreError::Timeout {
            operation: "create phone",
            timeout: Duration::from_millis(250),
        }
        .into();
        assert_eq!(timeout.exit_code(), exit_code::TIMEOUT);
        assert_eq!(timeout.to_string(), "create phone timed out after 250ms");
    }

    #[test]
    fn store_not_found_names_the_entity() {
        let err: CliError = CoreError::Store(StoreError::NotFound {
            collection: "gates".into(),
            id: "g1".into(),
        })
        .into();
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert_eq!(err.to_string(), "gate 'g1' not found");
    }

    #[test]
    fn halted_feed_maps_to_store_exit_code() {
        let err: CliError = CoreError::Feed(std::sync::Arc::new(FeedError::Closed {
            collection: "phones".into(),
        }))
        .into();
        assert_eq!(err.exit_code(), exit_code::STORE);
        assert!(matches!(err, CliError::FeedFailed { ref collection, .. } if collection == "phones"));
    }
}
