// ── In-process document store ──
//
// A complete `DocumentStore` held in memory. Every write commits under a
// single mutex and publishes the resulting changes on a per-collection
// broadcast feed before the lock is released, so watchers observe
// batches in commit order.

use std::collections::{BTreeMap, HashMap};
use std::future::{Future, ready};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::document::{ChangeBatch, ChangeKind, Document, DocumentChange, Filter};
use crate::error::StoreError;
use crate::patch::FieldPatch;
use crate::store::{ChangeStream, DocumentStore, Transaction};

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum FeedSignal {
    Batch(Arc<ChangeBatch>),
    Interrupted,
}

#[derive(Debug)]
enum Write {
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    Update {
        collection: String,
        id: String,
        patch: FieldPatch,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl Write {
    fn key(&self) -> (&str, &str) {
        match self {
            Self::Set { collection, id, .. }
            | Self::Update { collection, id, .. }
            | Self::Delete { collection, id } => (collection, id),
        }
    }
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Value>>,
    feeds: HashMap<String, broadcast::Sender<FeedSignal>>,
}

impl State {
    fn doc(&self, collection: &str, id: &str) -> Option<&Value> {
        self.collections.get(collection)?.get(id)
    }

    fn query(&self, collection: &str, filter: &Filter) -> Vec<Document> {
        self.collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|(_, data)| filter.matches(data))
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .collect()
    }

    fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .into_iter()
            .flatten()
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .collect()
    }

    fn snapshot_batch(&self, collection: &str) -> ChangeBatch {
        let changes = self
            .documents(collection)
            .into_iter()
            .map(|doc| DocumentChange {
                kind: ChangeKind::Added,
                doc_id: doc.id,
                data: doc.data,
            })
            .collect();
        ChangeBatch {
            changes,
            initial: true,
        }
    }

    fn subscribe(&mut self, collection: &str, capacity: usize) -> broadcast::Receiver<FeedSignal> {
        self.feeds
            .entry(collection.to_owned())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    /// Validate every write against the current state plus the writes
    /// staged before it, then apply them all and publish the changes.
    /// Nothing is applied if any write fails.
    fn commit(&mut self, writes: Vec<Write>, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut staged: HashMap<(String, String), Option<Value>> = HashMap::new();
        let mut order: Vec<(String, String)> = Vec::new();

        for write in writes {
            let (collection, id) = write.key();
            let key = (collection.to_owned(), id.to_owned());
            let current = match staged.get(&key) {
                Some(value) => value.clone(),
                None => self.doc(collection, id).cloned(),
            };

            let next = match write {
                Write::Set {
                    collection,
                    id,
                    data,
                } => {
                    if !data.is_object() {
                        return Err(StoreError::InvalidDocument {
                            collection,
                            id,
                            reason: "document body must be a JSON object".into(),
                        });
                    }
                    Some(data)
                }
                Write::Update {
                    collection,
                    id,
                    patch,
                } => {
                    if patch.is_empty() {
                        return Err(StoreError::InvalidPatch {
                            path: String::new(),
                            reason: "patch has no field updates".into(),
                        });
                    }
                    let Some(mut doc) = current else {
                        return Err(StoreError::NotFound { collection, id });
                    };
                    patch.apply_to(&mut doc, now)?;
                    Some(doc)
                }
                Write::Delete { .. } => None,
            };

            if !staged.contains_key(&key) {
                order.push(key.clone());
            }
            staged.insert(key, next);
        }

        let mut batches: Vec<(String, Vec<DocumentChange>)> = Vec::new();
        for key in order {
            let next = staged.remove(&key).flatten();
            let (collection, id) = key;
            let docs = self.collections.entry(collection.clone()).or_default();

            let previous = docs.get(&id).cloned();
            let change = match (previous, next) {
                (None, Some(data)) => {
                    docs.insert(id.clone(), data.clone());
                    Some((ChangeKind::Added, data))
                }
                (Some(old), Some(data)) if old != data => {
                    docs.insert(id.clone(), data.clone());
                    Some((ChangeKind::Modified, data))
                }
                (Some(old), None) => {
                    docs.remove(&id);
                    Some((ChangeKind::Removed, old))
                }
                _ => None,
            };

            let Some((kind, data)) = change else {
                trace!(collection, id, "write left document unchanged");
                continue;
            };
            trace!(collection, id, ?kind, "document committed");

            let change = DocumentChange {
                kind,
                doc_id: id,
                data,
            };
            match batches.iter_mut().find(|(c, _)| *c == collection) {
                Some((_, changes)) => changes.push(change),
                None => batches.push((collection, vec![change])),
            }
        }

        for (collection, changes) in batches {
            self.publish(
                &collection,
                ChangeBatch {
                    changes,
                    initial: false,
                },
            );
        }
        Ok(())
    }

    fn publish(&self, collection: &str, batch: ChangeBatch) {
        if let Some(feed) = self.feeds.get(collection) {
            // No receivers just means nobody is watching right now.
            let _ = feed.send(FeedSignal::Batch(Arc::new(batch)));
        }
    }
}

// ── MemoryTransaction ────────────────────────────────────────────────

struct MemoryTransaction<'a> {
    state: &'a State,
    writes: Vec<Write>,
}

impl Transaction for MemoryTransaction<'_> {
    fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        Ok(self.state.query(collection, filter))
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.state.doc(collection, id).map(|data| Document {
            id: id.to_owned(),
            data: data.clone(),
        }))
    }

    fn create(&mut self, collection: &str, data: Value) -> Result<String, StoreError> {
        let id = new_document_id();
        self.writes.push(Write::Set {
            collection: collection.to_owned(),
            id: id.clone(),
            data,
        });
        Ok(id)
    }

    fn set(&mut self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.writes.push(Write::Set {
            collection: collection.to_owned(),
            id: id.to_owned(),
            data,
        });
        Ok(())
    }

    fn update(&mut self, collection: &str, id: &str, patch: FieldPatch) -> Result<(), StoreError> {
        self.writes.push(Write::Update {
            collection: collection.to_owned(),
            id: id.to_owned(),
            patch,
        });
        Ok(())
    }

    fn delete(&mut self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.writes.push(Write::Delete {
            collection: collection.to_owned(),
            id: id.to_owned(),
        });
        Ok(())
    }
}

fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

// ── MemoryStore ──────────────────────────────────────────────────────

/// An in-process [`DocumentStore`].
///
/// Cheaply cloneable; clones share the same documents and feeds.
/// Transactions run under the store lock, so they are serializable.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    feed_capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(FEED_CAPACITY)
    }

    /// A store whose watchers are interrupted once they fall more than
    /// `capacity` batches behind.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                feed_capacity: capacity.max(1),
            }),
        }
    }

    /// Build a store from `{ "<collection>": { "<id>": { ... } } }`.
    pub fn from_json(value: Value) -> Result<Self, StoreError> {
        let store = Self::new();
        let Value::Object(collections) = value else {
            return Err(StoreError::InvalidDocument {
                collection: String::new(),
                id: String::new(),
                reason: "store dump must be a JSON object of collections".into(),
            });
        };

        {
            let mut state = store.inner.state.lock();
            for (collection, docs) in collections {
                let Value::Object(docs) = docs else {
                    return Err(StoreError::InvalidDocument {
                        collection,
                        id: String::new(),
                        reason: "collection must be a JSON object of documents".into(),
                    });
                };
                let entry = state.collections.entry(collection.clone()).or_default();
                for (id, data) in docs {
                    if !data.is_object() {
                        return Err(StoreError::InvalidDocument {
                            collection,
                            id,
                            reason: "document body must be a JSON object".into(),
                        });
                    }
                    entry.insert(id, data);
                }
            }
        }
        Ok(store)
    }

    /// Dump every collection as `{ "<collection>": { "<id>": { ... } } }`.
    pub fn to_json(&self) -> Value {
        let state = self.inner.state.lock();
        let mut out = Map::new();
        let mut names: Vec<&String> = state.collections.keys().collect();
        names.sort();
        for name in names {
            let docs: Map<String, Value> = state.collections[name]
                .iter()
                .map(|(id, data)| (id.clone(), data.clone()))
                .collect();
            out.insert(name.clone(), Value::Object(docs));
        }
        Value::Object(out)
    }

    /// Load a store dump from `path`. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let value: Value = serde_json::from_str(&text)?;
                let store = Self::from_json(value)?;
                debug!(path = %path.display(), "loaded store");
                Ok(store)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a store dump to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, text)?;
        debug!(path = %path.display(), "saved store");
        Ok(())
    }

    /// All documents currently in `collection`, ordered by id.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner.state.lock().documents(collection)
    }

    /// Interrupt every open watch with a resumable error.
    pub fn interrupt_watches(&self) {
        let state = self.inner.state.lock();
        for (collection, feed) in &state.feeds {
            debug!(collection, "interrupting watchers");
            let _ = feed.send(FeedSignal::Interrupted);
        }
    }

    fn commit(&self, write: Write) -> Result<(), StoreError> {
        self.inner.state.lock().commit(vec![write], Utc::now())
    }

    fn transact<T, E, F>(&self, mut f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnMut(&mut dyn Transaction) -> Result<T, E>,
    {
        let mut state = self.inner.state.lock();
        let (value, writes) = {
            let mut tx = MemoryTransaction {
                state: &state,
                writes: Vec::new(),
            };
            let value = f(&mut tx)?;
            (value, tx.writes)
        };
        state.commit(writes, Utc::now())?;
        Ok(value)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn watch(&self, collection: &str) -> ChangeStream {
        let inner = Arc::clone(&self.inner);
        let collection = collection.to_owned();

        Box::pin(async_stream::stream! {
            // Snapshot and subscribe under the same lock so no commit can
            // fall between the initial batch and the live feed.
            let (initial, mut rx) = {
                let mut state = inner.state.lock();
                let rx = state.subscribe(&collection, inner.feed_capacity);
                (state.snapshot_batch(&collection), rx)
            };
            yield Ok(initial);

            loop {
                match rx.recv().await {
                    Ok(FeedSignal::Batch(batch)) => yield Ok((*batch).clone()),
                    Ok(FeedSignal::Interrupted) => {
                        yield Err(StoreError::WatchInterrupted {
                            collection: collection.clone(),
                            resumable: true,
                        });
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(collection, skipped, "watcher lagged behind the change feed");
                        yield Err(StoreError::WatchInterrupted {
                            collection: collection.clone(),
                            resumable: true,
                        });
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn get_documents(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send {
        ready(Ok(self.inner.state.lock().query(collection, filter)))
    }

    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send {
        let doc = self
            .inner
            .state
            .lock()
            .doc(collection, id)
            .map(|data| Document {
                id: id.to_owned(),
                data: data.clone(),
            });
        ready(Ok(doc))
    }

    fn add_document(
        &self,
        collection: &str,
        data: Value,
    ) -> impl Future<Output = Result<String, StoreError>> + Send {
        let id = new_document_id();
        let result = self
            .commit(Write::Set {
                collection: collection.to_owned(),
                id: id.clone(),
                data,
            })
            .map(|()| id);
        ready(result)
    }

    fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        ready(self.commit(Write::Set {
            collection: collection.to_owned(),
            id: id.to_owned(),
            data,
        }))
    }

    fn update_fields(
        &self,
        collection: &str,
        id: &str,
        patch: FieldPatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        ready(self.commit(Write::Update {
            collection: collection.to_owned(),
            id: id.to_owned(),
            patch,
        }))
    }

    fn delete_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        ready(self.commit(Write::Delete {
            collection: collection.to_owned(),
            id: id.to_owned(),
        }))
    }

    fn run_transaction<T, E, F>(&self, f: F) -> impl Future<Output = Result<T, E>> + Send
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnMut(&mut dyn Transaction) -> Result<T, E> + Send,
    {
        ready(self.transact(f))
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    async fn next_batch(stream: &mut ChangeStream) -> ChangeBatch {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timed out waiting for batch")
            .expect("stream ended")
            .unwrap()
    }

    #[tokio::test]
    async fn watch_starts_with_initial_snapshot() {
        let store = MemoryStore::new();
        store
            .set_document("gates", "g1", json!({ "name": "front" }))
            .await
            .unwrap();

        let mut feed = store.watch("gates");
        let batch = next_batch(&mut feed).await;
        assert!(batch.initial);
        assert_eq!(batch.changes.len(), 1);
        assert_eq!(batch.changes[0].kind, ChangeKind::Added);
        assert_eq!(batch.changes[0].doc_id, "g1");
    }

    #[tokio::test]
    async fn watch_delivers_writes_in_commit_order() {
        let store = MemoryStore::new();
        let mut feed = store.watch("gates");
        assert!(next_batch(&mut feed).await.is_empty());

        store
            .set_document("gates", "g1", json!({ "phones": [] }))
            .await
            .unwrap();
        store
            .update_fields(
                "gates",
                "g1",
                FieldPatch::new().array_union("phones", vec![json!(100)]),
            )
            .await
            .unwrap();
        store.delete_document("gates", "g1").await.unwrap();

        let kinds: Vec<ChangeKind> = [
            next_batch(&mut feed).await,
            next_batch(&mut feed).await,
            next_batch(&mut feed).await,
        ]
        .iter()
        .map(|b| b.changes[0].kind)
        .collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Added, ChangeKind::Modified, ChangeKind::Removed]
        );
    }

    #[tokio::test]
    async fn unchanged_write_emits_nothing() {
        let store = MemoryStore::new();
        store
            .set_document("gates", "g1", json!({ "phones": [1] }))
            .await
            .unwrap();
        let mut feed = store.watch("gates");
        next_batch(&mut feed).await;

        store
            .update_fields(
                "gates",
                "g1",
                FieldPatch::new().array_union("phones", vec![json!(1)]),
            )
            .await
            .unwrap();
        store.set_document("gates", "g2", json!({})).await.unwrap();

        let batch = next_batch(&mut feed).await;
        assert_eq!(batch.changes[0].doc_id, "g2");
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_fields("phones", "nope", FieldPatch::new().set("active", true))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_missing_document_succeeds() {
        let store = MemoryStore::new();
        store.delete_document("phones", "nope").await.unwrap();
    }

    #[tokio::test]
    async fn set_rejects_non_object_body() {
        let store = MemoryStore::new();
        let err = store
            .set_document("gates", "g1", json!([1, 2]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument { .. }));
    }

    #[tokio::test]
    async fn transaction_commits_only_on_ok() {
        let store = MemoryStore::new();

        let aborted: Result<(), StoreError> = store
            .run_transaction(|tx| {
                tx.create("phones", json!({ "key": 1 }))?;
                Err(StoreError::Aborted("changed my mind".into()))
            })
            .await;
        assert!(aborted.is_err());
        assert!(store.documents("phones").is_empty());

        let id: String = store
            .run_transaction(|tx| tx.create("phones", json!({ "key": 1 })))
            .await
            .unwrap();
        assert_eq!(store.documents("phones")[0].id, id);
    }

    #[tokio::test]
    async fn transaction_with_failing_write_applies_nothing() {
        let store = MemoryStore::new();
        let result: Result<(), StoreError> = store
            .run_transaction(|tx| {
                tx.set("gates", "g1", json!({}))?;
                tx.update("gates", "missing", FieldPatch::new().set("name", "x"))
            })
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert!(store.documents("gates").is_empty());
    }

    #[tokio::test]
    async fn transaction_writes_arrive_as_one_batch() {
        let store = MemoryStore::new();
        let mut feed = store.watch("gates");
        next_batch(&mut feed).await;

        let _: () = store
            .run_transaction(|tx| {
                tx.set("gates", "a", json!({}))?;
                tx.set("gates", "b", json!({}))?;
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap();

        let batch = next_batch(&mut feed).await;
        assert!(!batch.initial);
        assert_eq!(batch.changes.len(), 2);
    }

    #[tokio::test]
    async fn interrupt_yields_resumable_error_and_ends_stream() {
        let store = MemoryStore::new();
        let mut feed = store.watch("gates");
        next_batch(&mut feed).await;

        store.interrupt_watches();
        let err = feed.next().await.unwrap().unwrap_err();
        assert!(err.is_resumable());
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn lagging_watcher_is_interrupted() {
        let store = MemoryStore::with_feed_capacity(2);
        let mut feed = store.watch("gates");
        next_batch(&mut feed).await;

        for i in 0..5 {
            store
                .set_document("gates", &format!("g{i}"), json!({}))
                .await
                .unwrap();
        }
        let err = feed.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            StoreError::WatchInterrupted {
                resumable: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn get_documents_filters_by_field() {
        let store = MemoryStore::new();
        store.add_document("phones", json!({ "key": 1 })).await.unwrap();
        store.add_document("phones", json!({ "key": 2 })).await.unwrap();

        let found = store
            .get_documents("phones", &Filter::eq("key", 2))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].data["key"], 2);
    }

    #[test]
    fn json_dump_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = MemoryStore::from_json(json!({
            "gates": { "g1": { "name": "front", "phones": [100] } },
            "phones": { "p1": { "key": 42 } }
        }))
        .unwrap();
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        assert_eq!(loaded.to_json(), store.to_json());
    }

    #[test]
    fn load_missing_file_gives_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(store.to_json(), json!({}));
    }

    #[test]
    fn from_json_rejects_scalar_documents() {
        let err = MemoryStore::from_json(json!({ "gates": { "g1": 5 } }))
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::InvalidDocument { .. }));
    }
}
