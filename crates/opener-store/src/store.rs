// ── Document-store capability ──
//
// The narrow surface the replica needs from a remote document store:
// watch a collection, read with a filter, write whole documents or
// field patches, and run atomic read-then-write transactions.

use std::future::Future;

use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::document::{ChangeBatch, Document, Filter};
use crate::error::StoreError;
use crate::patch::FieldPatch;

/// Live change feed for one collection.
///
/// Yields batches in commit order. An `Err` item ends the feed; the
/// consumer decides whether to reopen it based on
/// [`StoreError::is_resumable`].
pub type ChangeStream = BoxStream<'static, Result<ChangeBatch, StoreError>>;

/// Operations available inside [`DocumentStore::run_transaction`].
///
/// Reads observe the committed state at the time the transaction runs.
/// Writes are buffered and become visible only if the transaction
/// function returns `Ok`, all at once.
pub trait Transaction {
    fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Create a document with a store-assigned id and return that id.
    fn create(&mut self, collection: &str, data: Value) -> Result<String, StoreError>;

    fn set(&mut self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;

    fn update(&mut self, collection: &str, id: &str, patch: FieldPatch) -> Result<(), StoreError>;

    fn delete(&mut self, collection: &str, id: &str) -> Result<(), StoreError>;
}

/// A remote document store, as seen by the replica.
///
/// Every async operation is a single round-trip; dropping the returned
/// future cancels the request.
pub trait DocumentStore: Send + Sync + 'static {
    /// Open a change feed on `collection`. The first batch is `initial`.
    fn watch(&self, collection: &str) -> ChangeStream;

    fn get_documents(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send;

    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send;

    /// Create a document with a store-assigned id and return that id.
    fn add_document(
        &self,
        collection: &str,
        data: Value,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Create or overwrite the document at `id`.
    fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply a field patch to an existing document. Fails with
    /// [`StoreError::NotFound`] if the document does not exist.
    fn update_fields(
        &self,
        collection: &str,
        id: &str,
        patch: FieldPatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete the document at `id`. Deleting a missing document succeeds.
    fn delete_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Run `f` atomically against the store.
    ///
    /// `f` may be invoked more than once if the store retries on
    /// contention; it must not have side effects beyond the transaction.
    fn run_transaction<T, E, F>(&self, f: F) -> impl Future<Output = Result<T, E>> + Send
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnMut(&mut dyn Transaction) -> Result<T, E> + Send;
}
