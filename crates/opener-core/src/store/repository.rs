// ── Device repository ──
//
// The in-memory replica of the gate and phone collections. Feed tasks
// are the only writers; any number of callers read concurrently.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, trace, warn};

use super::collection::EntityCollection;
use crate::feed::{ChangeEvent, ChangeKind, FeedMessage};
use crate::model::{Collection, Gate, Phone};
use crate::phone::{LogNotifier, Notifier, PhoneHandle};
use crate::stream::CollectionWatch;

/// Replicated gates and phones.
///
/// Applying an event never fails: duplicates overwrite, removals of
/// unknown ids are no-ops, and `Modified` for an unknown id inserts.
pub struct DeviceRepository {
    gates: EntityCollection<Gate>,
    phones: EntityCollection<PhoneHandle>,
    gates_synced: watch::Sender<bool>,
    phones_synced: watch::Sender<bool>,
    notifier: Arc<dyn Notifier>,
}

impl DeviceRepository {
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(LogNotifier))
    }

    /// A repository whose phone handles notify through `notifier`.
    pub fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        let (gates_synced, _) = watch::channel(false);
        let (phones_synced, _) = watch::channel(false);
        Self {
            gates: EntityCollection::new(),
            phones: EntityCollection::new(),
            gates_synced,
            phones_synced,
            notifier,
        }
    }

    // ── Apply ────────────────────────────────────────────────────────

    pub fn apply_gate_event(&self, event: ChangeEvent<Gate>) {
        let ChangeEvent { kind, id, entity } = event;
        match (kind, entity) {
            (ChangeKind::Added | ChangeKind::Modified, Some(mut gate)) => {
                gate.id.clone_from(&id);
                let is_new = self.gates.upsert(id.clone(), Arc::new(gate));
                trace!(gate = %id, ?kind, is_new, "gate applied");
            }
            (ChangeKind::Added | ChangeKind::Modified, None) => {
                warn!(gate = %id, ?kind, "gate event without entity ignored");
            }
            (ChangeKind::Removed, _) => {
                let removed = self.gates.remove(&id).is_some();
                trace!(gate = %id, removed, "gate removed");
            }
        }
    }

    pub fn apply_phone_event(&self, event: ChangeEvent<Phone>) {
        let ChangeEvent { kind, id, entity } = event;
        match (kind, entity) {
            (ChangeKind::Added | ChangeKind::Modified, Some(mut phone)) => {
                phone.id.clone_from(&id);
                if let Some(handle) = self.phones.get(&id) {
                    handle.replace(phone);
                    self.phones.touch();
                    trace!(phone = %id, ?kind, "phone replaced");
                } else {
                    let handle = PhoneHandle::new(phone, Arc::clone(&self.notifier));
                    self.phones.upsert(id.clone(), Arc::new(handle));
                    trace!(phone = %id, ?kind, "phone inserted");
                }
            }
            (ChangeKind::Added | ChangeKind::Modified, None) => {
                warn!(phone = %id, ?kind, "phone event without entity ignored");
            }
            (ChangeKind::Removed, _) => {
                let removed = self.phones.remove(&id).is_some();
                trace!(phone = %id, removed, "phone removed");
            }
        }
    }

    pub fn apply_gate_message(&self, message: FeedMessage<Gate>) {
        match message {
            FeedMessage::Change(event) => self.apply_gate_event(event),
            FeedMessage::Synced { ids } => {
                let pruned = self.gates.retain_ids(&ids.into_iter().collect::<HashSet<_>>());
                self.mark_synced(Collection::Gates, &pruned);
            }
        }
    }

    pub fn apply_phone_message(&self, message: FeedMessage<Phone>) {
        match message {
            FeedMessage::Change(event) => self.apply_phone_event(event),
            FeedMessage::Synced { ids } => {
                let pruned = self.phones.retain_ids(&ids.into_iter().collect::<HashSet<_>>());
                self.mark_synced(Collection::Phones, &pruned);
            }
        }
    }

    fn mark_synced(&self, collection: Collection, pruned: &[String]) {
        if !pruned.is_empty() {
            debug!(%collection, ?pruned, "pruned entries missing from snapshot");
        }
        self.synced_sender(collection).send_replace(true);
        debug!(%collection, "collection synced");
    }

    /// Forget both first-snapshot marks ahead of a new run of feeds.
    /// Entries stay until the new snapshots prune them.
    pub(crate) fn clear_synced(&self) {
        self.gates_synced.send_replace(false);
        self.phones_synced.send_replace(false);
    }

    fn synced_sender(&self, collection: Collection) -> &watch::Sender<bool> {
        match collection {
            Collection::Gates => &self.gates_synced,
            Collection::Phones => &self.phones_synced,
        }
    }

    // ── Gate queries ─────────────────────────────────────────────────

    /// Every gate, ordered by id.
    pub fn list_gates(&self) -> Arc<Vec<Arc<Gate>>> {
        self.gates.snapshot()
    }

    pub fn gate(&self, id: &str) -> Option<Arc<Gate>> {
        self.gates.get(id)
    }

    /// Gates that list `key` among their phones.
    pub fn gates_for_phone_key(&self, key: i64) -> Vec<Arc<Gate>> {
        self.gates
            .snapshot()
            .iter()
            .filter(|g| g.has_phone(key))
            .cloned()
            .collect()
    }

    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    pub fn subscribe_gates(&self) -> CollectionWatch<Gate> {
        self.gates.watch(Collection::Gates)
    }

    // ── Phone queries ────────────────────────────────────────────────

    pub fn get_phone(&self, id: &str) -> Option<Arc<Phone>> {
        self.phones.get(id).map(|h| h.entity())
    }

    pub fn phone_handle(&self, id: &str) -> Option<Arc<PhoneHandle>> {
        self.phones.get(id)
    }

    /// Every phone, ordered by id.
    pub fn all_phones(&self) -> Vec<Arc<Phone>> {
        self.phones.snapshot().iter().map(|h| h.entity()).collect()
    }

    /// Every phone handle, ordered by id.
    pub fn phone_handles(&self) -> Arc<Vec<Arc<PhoneHandle>>> {
        self.phones.snapshot()
    }

    /// The first phone (by id) carrying `key`.
    pub fn phone_by_key(&self, key: i64) -> Option<Arc<Phone>> {
        self.phones
            .find(|h| h.entity().key == key)
            .map(|h| h.entity())
    }

    pub fn phone_count(&self) -> usize {
        self.phones.len()
    }

    pub fn subscribe_phones(&self) -> CollectionWatch<PhoneHandle> {
        self.phones.watch(Collection::Phones)
    }

    // ── Readiness ────────────────────────────────────────────────────

    pub fn gates_synced(&self) -> bool {
        *self.gates_synced.borrow()
    }

    pub fn phones_synced(&self) -> bool {
        *self.phones_synced.borrow()
    }

    /// Wait until `collection` has received its first full snapshot.
    pub async fn wait_synced(&self, collection: Collection) {
        let mut rx = self.synced_sender(collection).subscribe();
        // The sender lives in `self`, so this can only end by seeing `true`.
        let _ = rx.wait_for(|synced| *synced).await;
    }
}

impl Default for DeviceRepository {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
