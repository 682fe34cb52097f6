//! Document-store capability consumed by the opener replica.
//!
//! The replica never talks to a concrete database directly. It depends on
//! the [`DocumentStore`] trait defined here:
//!
//! - **[`DocumentStore::watch`]** opens a per-collection change feed that
//!   starts with an initial snapshot batch and then delivers committed
//!   changes in order.
//! - **Reads and writes** cover filtered queries, whole-document sets,
//!   and [`FieldPatch`] updates with array union/remove and server
//!   timestamps.
//! - **[`DocumentStore::run_transaction`]** runs a read-then-write closure
//!   atomically.
//!
//! [`MemoryStore`] is a complete in-process implementation, persisted as
//! a single JSON file by the CLI and used throughout the test suites.

pub mod document;
pub mod error;
pub mod memory;
pub mod patch;
pub mod store;

pub use document::{ChangeBatch, ChangeKind, Document, DocumentChange, Filter};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use patch::{FieldPatch, FieldUpdate, FieldValue};
pub use store::{ChangeStream, DocumentStore, Transaction};
