// ── Collection watches ──
//
// A `CollectionWatch` follows one replicated collection through its
// version counter. The collection swaps in the new snapshot before it
// bumps the version, so a watcher woken by a version change always reads
// state that contains the whole event.

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::Collection;

/// Change subscription for one collection of the repository.
///
/// Several events applied between two waits are reported as a single
/// change. Callers that need a particular state re-check it after each
/// [`changed()`](Self::changed).
pub struct CollectionWatch<T: Send + Sync + 'static> {
    collection: Collection,
    seen: u64,
    version: watch::Receiver<u64>,
    snapshot: watch::Receiver<Arc<Vec<Arc<T>>>>,
}

impl<T: Send + Sync + 'static> CollectionWatch<T> {
    pub(crate) fn new(
        collection: Collection,
        version: watch::Receiver<u64>,
        snapshot: watch::Receiver<Arc<Vec<Arc<T>>>>,
    ) -> Self {
        let seen = *version.borrow();
        Self {
            collection,
            seen,
            version,
            snapshot,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Version observed at subscription or by the last `changed()`.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Version the repository holds right now.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Entities in the collection right now, ordered by id.
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Wait until the collection moves past the last observed version and
    /// return the new one. Returns `None` once the repository is gone.
    pub async fn changed(&mut self) -> Option<u64> {
        let seen = self.seen;
        let version = *self.version.wait_for(|v| *v != seen).await.ok()?;
        self.seen = version;
        Some(version)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use tokio_test::{assert_pending, assert_ready, task};

    use crate::model::Collection;
    use crate::store::collection::EntityCollection;

    #[test]
    fn changed_waits_for_the_next_mutation() {
        let gates = EntityCollection::<String>::new();
        let mut watch = gates.watch(Collection::Gates);
        assert!(watch.snapshot().is_empty());
        assert_eq!(watch.seen(), 0);

        let mut next = task::spawn(watch.changed());
        assert_pending!(next.poll());

        gates.upsert("a".into(), Arc::new("alpha".to_owned()));
        assert!(next.is_woken());
        assert_eq!(assert_ready!(next.poll()), Some(1));
        drop(next);

        assert_eq!(watch.seen(), 1);
        assert_eq!(*watch.snapshot()[0], "alpha");
    }

    #[test]
    fn mutations_between_waits_collapse_into_one_change() {
        let phones = EntityCollection::<String>::new();
        let mut watch = phones.watch(Collection::Phones);

        phones.upsert("b".into(), Arc::new("beta".to_owned()));
        phones.upsert("a".into(), Arc::new("alpha".to_owned()));
        assert_eq!(watch.version(), 2);
        assert_eq!(watch.seen(), 0);

        let mut next = task::spawn(watch.changed());
        assert_eq!(assert_ready!(next.poll()), Some(2));
        drop(next);

        let names: Vec<String> = watch.snapshot().iter().map(|s| s.to_string()).collect();
        assert_eq!(names, ["alpha", "beta"]);

        let mut idle = task::spawn(watch.changed());
        assert_pending!(idle.poll());
    }

    #[test]
    fn changed_returns_none_once_the_collection_is_dropped() {
        let gates = EntityCollection::<String>::new();
        let mut watch = gates.watch(Collection::Gates);
        assert_eq!(watch.collection(), Collection::Gates);
        drop(gates);

        let mut next = task::spawn(watch.changed());
        assert!(assert_ready!(next.poll()).is_none());
    }
}
