// ── Generic reactive entity collection ──
//
// Concurrent storage keyed by document id, with push-based change
// notification via `watch` channels.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::Collection;
use crate::stream::CollectionWatch;

/// A concurrent, reactive collection for a single entity type.
///
/// Uses `DashMap` for O(1) concurrent lookups and `watch` channels
/// for push-based change notification. Every mutation bumps a version
/// counter and rebuilds the snapshot that subscribers receive. Values
/// are replaced as whole `Arc`s, so a reader holding one never sees it
/// change underneath.
pub(crate) struct EntityCollection<T: Send + Sync + 'static> {
    /// Document id -> entity.
    by_id: DashMap<String, Arc<T>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot ordered by id, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_id: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace an entity. Returns `true` if the id was new.
    pub(crate) fn upsert(&self, id: String, entity: Arc<T>) -> bool {
        let is_new = self.by_id.insert(id, entity).is_none();
        self.publish();
        is_new
    }

    /// Remove an entity by id. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, id: &str) -> Option<Arc<T>> {
        let removed = self.by_id.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Remove every entity whose id is not in `keep`. Returns the removed ids.
    pub(crate) fn retain_ids(&self, keep: &HashSet<String>) -> Vec<String> {
        let stale: Vec<String> = self
            .by_id
            .iter()
            .filter(|r| !keep.contains(r.key()))
            .map(|r| r.key().clone())
            .collect();

        for id in &stale {
            self.by_id.remove(id);
        }
        if !stale.is_empty() {
            self.publish();
        }
        stale
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<T>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Find the first entity matching `predicate`, in id order.
    pub(crate) fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        self.snapshot().iter().find(|e| predicate(e)).cloned()
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Follow this collection's changes as `collection`.
    pub(crate) fn watch(&self, collection: Collection) -> CollectionWatch<T> {
        CollectionWatch::new(collection, self.version.subscribe(), self.snapshot.subscribe())
    }

    /// Republish after an entity changed in place.
    pub(crate) fn touch(&self) {
        self.publish();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        self.rebuild_snapshot();
        self.bump_version();
    }

    /// Collect all values ordered by id and broadcast to subscribers.
    fn rebuild_snapshot(&self) {
        let mut entries: Vec<(String, Arc<T>)> = self
            .by_id
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values: Vec<Arc<T>> = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}
