//! Shared helpers for command handlers.

use std::path::Path;
use std::sync::Arc;

use opener_core::{DeviceRepository, Gate, Phone};

use crate::error::CliError;

/// Resolve a phone identifier (document id, or numeric key) via the replica.
pub fn resolve_phone(repo: &DeviceRepository, identifier: &str) -> Result<Arc<Phone>, CliError> {
    repo.get_phone(identifier)
        .or_else(|| {
            identifier
                .parse::<i64>()
                .ok()
                .and_then(|key| repo.phone_by_key(key))
        })
        .ok_or_else(|| CliError::NotFound {
            resource_type: "phone".into(),
            identifier: identifier.into(),
            list_command: "phones list".into(),
        })
}

pub fn resolve_gate(repo: &DeviceRepository, id: &str) -> Result<Arc<Gate>, CliError> {
    repo.gate(id).ok_or_else(|| CliError::NotFound {
        resource_type: "gate".into(),
        identifier: id.into(),
        list_command: "gates list".into(),
    })
}

/// Read and parse a JSON file for `--from-file` flags.
pub fn read_json_file(path: &Path) -> Result<serde_json::Value, CliError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| CliError::Validation {
        field: "from-file".into(),
        reason: format!("invalid JSON: {e}"),
    })
}

/// `-` for empty strings in detail views.
pub fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}
