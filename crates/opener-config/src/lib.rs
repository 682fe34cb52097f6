//! Shared configuration for opener tools.
//!
//! TOML file + `OPENER_` environment overrides, merged with figment, and
//! translated into `opener_core::ReplicaConfig`. The core crate never
//! reads configuration itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use opener_core::{DecodePolicy, ReconnectConfig, ReplicaConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub replica: ReplicaSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    /// Output format: "table", "json", "json-compact", "yaml", or "plain".
    #[serde(default = "default_output")]
    pub output: String,

    /// How long to wait for a write to show up in the replica (ms).
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_confirm_timeout_ms() -> u64 {
    5_000
}

/// Where the file-backed document store lives.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreSettings {
    /// Path to the JSON store file. Defaults to the platform data dir.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReplicaSettings {
    #[serde(default = "default_gates_collection")]
    pub gates_collection: String,

    #[serde(default = "default_phones_collection")]
    pub phones_collection: String,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// "halt" or "resume".
    #[serde(default = "default_decode_policy")]
    pub decode_policy: String,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl Default for ReplicaSettings {
    fn default() -> Self {
        Self {
            gates_collection: default_gates_collection(),
            phones_collection: default_phones_collection(),
            command_timeout_ms: default_command_timeout_ms(),
            channel_capacity: default_channel_capacity(),
            decode_policy: default_decode_policy(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

fn default_gates_collection() -> String {
    "gates".into()
}
fn default_phones_collection() -> String {
    "phones".into()
}
fn default_command_timeout_ms() -> u64 {
    10_000
}
fn default_channel_capacity() -> usize {
    256
}
fn default_decode_policy() -> String {
    "halt".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Omit to retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: None,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "opener", "opener")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("opener");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the JSON store file.
pub fn default_store_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("store.json"),
        |dirs| dirs.data_dir().join("store.json"),
    )
}

impl Config {
    /// The configured store path, or the platform default.
    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(default_store_path)
    }
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `OPENER_` env vars
/// (`__` separates nesting: `OPENER_REPLICA__COMMAND_TIMEOUT_MS`).
fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("OPENER_").split("__"))
}

/// Load the full Config from `path` + environment. A missing file is
/// not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to core ─────────────────────────────────────────────

fn parse_decode_policy(value: &str) -> Result<DecodePolicy, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "halt" => Ok(DecodePolicy::Halt),
        "resume" => Ok(DecodePolicy::Resume),
        other => Err(ConfigError::Validation {
            field: "replica.decode_policy".into(),
            reason: format!("expected 'halt' or 'resume', got '{other}'"),
        }),
    }
}

fn non_empty(field: &str, value: &str) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(value.to_owned())
}

/// Build a validated `ReplicaConfig` from the loaded settings.
pub fn to_replica_config(cfg: &Config) -> Result<ReplicaConfig, ConfigError> {
    let settings = &cfg.replica;

    let gates_collection = non_empty("replica.gates_collection", &settings.gates_collection)?;
    let phones_collection = non_empty("replica.phones_collection", &settings.phones_collection)?;
    if gates_collection == phones_collection {
        return Err(ConfigError::Validation {
            field: "replica.phones_collection".into(),
            reason: format!("must differ from gates_collection ('{gates_collection}')"),
        });
    }

    if settings.command_timeout_ms == 0 {
        return Err(ConfigError::Validation {
            field: "replica.command_timeout_ms".into(),
            reason: "must be greater than zero".into(),
        });
    }
    if settings.channel_capacity == 0 {
        return Err(ConfigError::Validation {
            field: "replica.channel_capacity".into(),
            reason: "must be greater than zero".into(),
        });
    }

    let reconnect = &settings.reconnect;
    if reconnect.initial_delay_ms > reconnect.max_delay_ms {
        return Err(ConfigError::Validation {
            field: "replica.reconnect.initial_delay_ms".into(),
            reason: format!(
                "{} exceeds max_delay_ms ({})",
                reconnect.initial_delay_ms, reconnect.max_delay_ms
            ),
        });
    }

    Ok(ReplicaConfig {
        gates_collection,
        phones_collection,
        command_timeout: Duration::from_millis(settings.command_timeout_ms),
        channel_capacity: settings.channel_capacity,
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(reconnect.max_delay_ms),
            max_retries: reconnect.max_retries,
        },
        decode_policy: parse_decode_policy(&settings.decode_policy)?,
    })
}
