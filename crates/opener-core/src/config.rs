// ── Runtime replica configuration ──
//
// These types describe *how* the replica runs: which collections to
// watch, how long commands may take, and how feeds recover. They never
// touch disk. The CLI builds a `ReplicaConfig` and hands it in.

use std::time::Duration;

use crate::model::Collection;

/// What a feed does after reporting a document it cannot decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodePolicy {
    /// End the watch. The error is returned from the feed task.
    #[default]
    Halt,
    /// Drop the watch and open a fresh one, starting with a full resync.
    Resume,
}

/// Exponential backoff configuration for reopening a collection watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reopen attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum consecutive reopen attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Configuration for one replica of the gate and phone collections.
///
/// Built by the CLI, passed to `Replica`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConfig {
    /// Store collection holding gate documents.
    pub gates_collection: String,
    /// Store collection holding phone documents.
    pub phones_collection: String,
    /// Upper bound on every command's store round-trip.
    pub command_timeout: Duration,
    /// Capacity of the feed → repository channels.
    pub channel_capacity: usize,
    /// Watch recovery after resumable store errors.
    pub reconnect: ReconnectConfig,
    /// Feed behavior after a decode error.
    pub decode_policy: DecodePolicy,
}

impl ReplicaConfig {
    /// The store collection name for `collection`.
    pub fn collection_name(&self, collection: Collection) -> &str {
        match collection {
            Collection::Gates => &self.gates_collection,
            Collection::Phones => &self.phones_collection,
        }
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            gates_collection: Collection::Gates.default_name().into(),
            phones_collection: Collection::Phones.default_name().into(),
            command_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
            decode_policy: DecodePolicy::default(),
        }
    }
}
