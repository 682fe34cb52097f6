//! Live replica of the gate and phone collections of a document store.
//!
//! This crate owns the domain model and the replication machinery:
//!
//! - **[`Replica`]**: Central facade: [`start()`](Replica::start) spawns
//!   one feed task and one apply task per collection,
//!   [`shutdown()`](Replica::shutdown) cancels and joins them.
//!   [`Replica::oneshot()`](Replica::oneshot) runs a single closure
//!   against a freshly synced replica, for CLI use.
//!
//! - **[`FeedAdapter`]**: Turns a store watch into ordered, typed
//!   [`FeedMessage`]s. Decode and store failures are published on a
//!   separate error channel; resumable failures reopen the watch with
//!   backoff, and every reopen resyncs from a full snapshot.
//!
//! - **[`DeviceRepository`]**: Concurrent in-memory view (`DashMap` +
//!   `tokio::sync::watch` snapshots). Applying an event never fails and
//!   readers never see a half-applied one.
//!
//! - **[`DeviceCommands`]**: Writes sent straight to the store. Nothing
//!   becomes visible locally until the feed echoes it back.
//!
//! - **[`PhoneHandle`]**: Live phone view plus the outbound
//!   [`Notifier`] hook.

pub mod command;
pub mod config;
pub mod error;
pub mod feed;
pub mod model;
pub mod phone;
pub mod replica;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult, DeviceCommands};
pub use config::{DecodePolicy, ReconnectConfig, ReplicaConfig};
pub use error::CoreError;
pub use feed::{ChangeEvent, ChangeKind, Decode, FeedAdapter, FeedError, FeedMessage};
pub use phone::{LogNotifier, Notifier, PhoneCapability, PhoneHandle};
pub use replica::{Replica, ReplicaState};
pub use store::DeviceRepository;
pub use stream::CollectionWatch;

pub use model::{
    ActivationRecord, Collection, Gate, Phone, PhoneCreateAttributes, PhoneUpdateAttributes,
};
