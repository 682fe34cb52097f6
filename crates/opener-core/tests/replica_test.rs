// End-to-end replica tests: commands go to a `MemoryStore`, effects come
// back through the feeds into the repository.

#![allow(clippy::unwrap_used)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use opener_core::{
    Collection, CoreError, DecodePolicy, FeedError, Gate, PhoneCreateAttributes, ReconnectConfig,
    Replica, ReplicaConfig, ReplicaState,
};
use opener_store::{
    ChangeStream, Document, DocumentStore, FieldPatch, Filter, MemoryStore, StoreError, Transaction,
};

// ── Helpers ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

fn config() -> ReplicaConfig {
    ReplicaConfig {
        command_timeout: Duration::from_secs(1),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_retries: Some(10),
        },
        ..ReplicaConfig::default()
    }
}

async fn setup(store: &MemoryStore) -> Replica<MemoryStore> {
    let replica = Replica::new(Arc::new(store.clone()), config());
    replica.start().await.unwrap();
    tokio::time::timeout(WAIT, replica.wait_synced()).await.unwrap().unwrap();
    replica
}

/// Poll `check` until it holds or the wait expires.
async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn phone_attrs(key: i64) -> PhoneCreateAttributes {
    PhoneCreateAttributes {
        key,
        friendly_name: format!("phone {key}"),
        owner: "ann".into(),
        number: "+15550100".into(),
        email: "ann@example.com".into(),
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_gate_phone_association_round_trip() {
    let store = MemoryStore::new();
    let replica = setup(&store).await;
    let repo = Arc::clone(replica.repository());

    replica
        .commands()
        .create_gate("G", &Gate::default())
        .await
        .unwrap();
    eventually("gate G", || repo.gate("G").is_some()).await;
    assert!(repo.gate("G").unwrap().phones.is_empty());

    replica.commands().add_gate_phone("G", 100).await.unwrap();
    eventually("phone 100 on G", || repo.gate("G").unwrap().has_phone(100)).await;

    let gates = repo.list_gates();
    assert_eq!(gates.len(), 1);
    assert_eq!(gates[0].id, "G");
    assert_eq!(gates[0].phones.iter().copied().collect::<Vec<_>>(), vec![100]);

    replica.shutdown().await;
}

#[tokio::test]
async fn test_phone_create_then_delete() {
    let store = MemoryStore::new();
    let replica = setup(&store).await;
    let repo = Arc::clone(replica.repository());

    let id = replica.commands().create_phone(&phone_attrs(42)).await.unwrap();
    eventually("phone added", || repo.get_phone(&id).is_some()).await;
    let phone = repo.get_phone(&id).unwrap();
    assert_eq!(phone.key, 42);
    assert!(!phone.active);
    assert_eq!(repo.phone_by_key(42).unwrap().id, id);

    replica.commands().delete_phone(&id).await.unwrap();
    eventually("phone removed", || repo.get_phone(&id).is_none()).await;

    replica.shutdown().await;
}

#[tokio::test]
async fn test_add_then_remove_key_leaves_it_absent() {
    let store = MemoryStore::new();
    let replica = setup(&store).await;
    let repo = Arc::clone(replica.repository());
    let commands = replica.commands();

    commands.create_gate("G", &Gate::default()).await.unwrap();

    // Remove confirmed after the add.
    commands.add_gate_phone("G", 1).await.unwrap();
    eventually("key 1 added", || repo.gate("G").is_some_and(|g| g.has_phone(1))).await;
    commands.remove_gate_phone("G", 1).await.unwrap();

    // Remove issued before the add is confirmed.
    commands.add_gate_phone("G", 2).await.unwrap();
    commands.remove_gate_phone("G", 2).await.unwrap();

    // Concurrent adds of different keys both survive.
    let (a, b) = tokio::join!(commands.add_gate_phone("G", 3), commands.add_gate_phone("G", 4));
    a.unwrap();
    b.unwrap();

    eventually("keys 3 and 4", || {
        repo.gate("G").is_some_and(|g| g.has_phone(3) && g.has_phone(4))
    })
    .await;
    let gate = repo.gate("G").unwrap();
    assert!(!gate.has_phone(1));
    assert!(!gate.has_phone(2));

    replica.shutdown().await;
}

#[tokio::test]
async fn test_update_phone_changes_only_named_field() {
    let store = MemoryStore::new();
    let replica = setup(&store).await;
    let repo = Arc::clone(replica.repository());

    let id = replica.commands().create_phone(&phone_attrs(5)).await.unwrap();
    eventually("phone added", || repo.get_phone(&id).is_some()).await;
    let before = repo.get_phone(&id).unwrap();

    let update = opener_core::PhoneUpdateAttributes {
        friendly_name: Some("Gate remote".into()),
        ..Default::default()
    };
    replica.commands().update_phone(&id, &update).await.unwrap();
    eventually("name changed", || {
        repo.get_phone(&id).unwrap().friendly_name == "Gate remote"
    })
    .await;

    let after = repo.get_phone(&id).unwrap();
    assert_eq!(after.owner, before.owner);
    assert_eq!(after.number, before.number);
    assert_eq!(after.email, before.email);
    assert_eq!(after.key, before.key);

    replica.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_create_yields_exactly_one_conflict() {
    let store = MemoryStore::new();
    let replica = setup(&store).await;
    let commands = replica.commands();

    let a = phone_attrs(77);
    let b = phone_attrs(77);
    let (first, second) = tokio::join!(commands.create_phone(&a), commands.create_phone(&b));
    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert!(
        matches!(first, Err(CoreError::Conflict { key: 77 }))
            || matches!(second, Err(CoreError::Conflict { key: 77 }))
    );

    let repo = Arc::clone(replica.repository());
    eventually("one phone", || repo.phone_count() == 1).await;
    replica.shutdown().await;
}

#[tokio::test]
async fn test_activation_arrives_with_server_time() {
    let store = MemoryStore::new();
    let replica = setup(&store).await;
    let repo = Arc::clone(replica.repository());

    let id = replica.commands().create_phone(&phone_attrs(8)).await.unwrap();
    replica.commands().set_activation(&id, 4321).await.unwrap();
    replica.commands().activate_phone(&id, true).await.unwrap();

    eventually("activation", || {
        repo.get_phone(&id).is_some_and(|p| p.active && p.activation.is_some())
    })
    .await;
    let activation = repo.get_phone(&id).unwrap().activation.unwrap();
    assert_eq!(activation.code, 4321);
    assert!(activation.when.is_some());

    replica.shutdown().await;
}

// ── Recovery ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_resync_after_interrupt_converges() {
    let store = MemoryStore::new();
    store.set_document("phones", "p1", json!({ "key": 1 })).await.unwrap();
    store.set_document("phones", "p2", json!({ "key": 2 })).await.unwrap();

    let replica = setup(&store).await;
    let repo = Arc::clone(replica.repository());
    let mut errors = replica.errors();
    assert_eq!(repo.phone_count(), 2);

    store.interrupt_watches();
    store.delete_document("phones", "p1").await.unwrap();
    store.set_document("phones", "p3", json!({ "key": 3 })).await.unwrap();

    let err = tokio::time::timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(&*err, FeedError::Store { source, .. } if source.is_resumable()));

    eventually("resynced phones", || {
        repo.get_phone("p1").is_none()
            && repo.get_phone("p2").is_some()
            && repo.get_phone("p3").is_some()
    })
    .await;
    assert_eq!(*replica.state().borrow(), ReplicaState::Running);

    replica.shutdown().await;
}

#[tokio::test]
async fn test_decode_error_halts_only_that_feed() {
    let store = MemoryStore::new();
    store.set_document("phones", "good", json!({ "key": 1 })).await.unwrap();

    let replica = setup(&store).await;
    let repo = Arc::clone(replica.repository());
    let mut errors = replica.errors();
    let mut state = replica.state();

    store
        .set_document("phones", "bad", json!({ "key": "not a number" }))
        .await
        .unwrap();

    let err = tokio::time::timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(&*err, FeedError::Decode { id, .. } if id == "bad"));
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ReplicaState::Failed))
        .await
        .unwrap()
        .unwrap();

    // The bad document was never applied; earlier state is intact.
    assert!(repo.get_phone("bad").is_none());
    assert!(repo.get_phone("good").is_some());

    // Gates keep replicating.
    replica
        .commands()
        .create_gate("G", &Gate::default())
        .await
        .unwrap();
    eventually("gate after phone failure", || repo.gate("G").is_some()).await;

    replica.shutdown().await;
    assert_eq!(*replica.state().borrow(), ReplicaState::Failed);
}

#[tokio::test]
async fn test_decode_error_resumes_when_configured() {
    let store = MemoryStore::new();
    let replica = Replica::new(
        Arc::new(store.clone()),
        ReplicaConfig {
            decode_policy: DecodePolicy::Resume,
            ..config()
        },
    );
    replica.start().await.unwrap();
    tokio::time::timeout(WAIT, replica.wait_synced()).await.unwrap().unwrap();
    let repo = Arc::clone(replica.repository());
    let mut errors = replica.errors();

    store
        .set_document("gates", "G", json!({ "rollingCode": -1 }))
        .await
        .unwrap();
    let err = tokio::time::timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(&*err, FeedError::Decode { .. }));

    store
        .set_document("gates", "G", json!({ "rollingCode": 9 }))
        .await
        .unwrap();
    eventually("fixed gate", || repo.gate("G").is_some_and(|g| g.rolling_code == 9)).await;
    assert_eq!(*replica.state().borrow(), ReplicaState::Running);

    replica.shutdown().await;
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_lifecycle_states() {
    let store = MemoryStore::new();
    let replica = Replica::new(Arc::new(store.clone()), config());
    assert_eq!(*replica.state().borrow(), ReplicaState::Idle);

    replica.start().await.unwrap();
    assert_eq!(*replica.state().borrow(), ReplicaState::Running);
    assert!(matches!(replica.start().await, Err(CoreError::AlreadyRunning)));

    tokio::time::timeout(WAIT, replica.wait_synced()).await.unwrap().unwrap();
    assert!(replica.repository().gates_synced());
    assert!(replica.repository().phones_synced());

    replica.shutdown().await;
    assert_eq!(*replica.state().borrow(), ReplicaState::Stopped);

    replica.start().await.unwrap();
    assert_eq!(*replica.state().borrow(), ReplicaState::Running);
    replica.shutdown().await;
}

#[tokio::test]
async fn test_restart_resyncs_against_applied_state() {
    let store = MemoryStore::new();
    store.set_document("phones", "p1", json!({ "key": 1 })).await.unwrap();
    store.set_document("phones", "p2", json!({ "key": 2 })).await.unwrap();
    store.set_document("gates", "G", json!({ "rollingCode": 1 })).await.unwrap();

    let replica = setup(&store).await;
    let repo = Arc::clone(replica.repository());
    replica.shutdown().await;

    store.delete_document("phones", "p1").await.unwrap();
    store.set_document("gates", "G", json!({ "rollingCode": 2 })).await.unwrap();
    assert!(repo.get_phone("p1").is_some());
    assert_eq!(repo.gate("G").unwrap().rolling_code, 1);

    replica.start().await.unwrap();
    assert!(!repo.phones_synced());
    tokio::time::timeout(WAIT, replica.wait_synced()).await.unwrap().unwrap();

    assert!(repo.get_phone("p1").is_none());
    assert_eq!(repo.get_phone("p2").unwrap().key, 2);
    assert_eq!(repo.gate("G").unwrap().rolling_code, 2);
    assert_eq!(*replica.state().borrow(), ReplicaState::Running);

    // The new run still follows live changes.
    replica.commands().add_gate_phone("G", 5).await.unwrap();
    eventually("key 5 on G", || repo.gate("G").is_some_and(|g| g.has_phone(5))).await;

    replica.shutdown().await;
}

#[tokio::test]
async fn test_failed_replica_can_start_again() {
    let store = MemoryStore::new();
    store.set_document("phones", "bad", json!({ "key": "x" })).await.unwrap();

    let replica = Replica::new(Arc::new(store.clone()), config());
    replica.start().await.unwrap();
    let err = tokio::time::timeout(WAIT, replica.wait_synced())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, CoreError::Feed(ref e) if matches!(**e, FeedError::Decode { .. })));
    assert_eq!(*replica.state().borrow(), ReplicaState::Failed);
    assert!(replica.failure().is_some());

    store.set_document("phones", "bad", json!({ "key": 3 })).await.unwrap();
    replica.start().await.unwrap();
    assert!(replica.failure().is_none());
    tokio::time::timeout(WAIT, replica.wait_synced()).await.unwrap().unwrap();
    assert_eq!(replica.repository().get_phone("bad").unwrap().key, 3);

    replica.shutdown().await;
    assert_eq!(*replica.state().borrow(), ReplicaState::Stopped);
}

#[tokio::test]
async fn test_shutdown_keeps_applied_state() {
    let store = MemoryStore::new();
    store.set_document("gates", "G", json!({ "phones": [1] })).await.unwrap();

    let replica = setup(&store).await;
    replica.shutdown().await;
    store.delete_document("gates", "G").await.unwrap();

    assert!(replica.repository().gate("G").unwrap().has_phone(1));
}

#[tokio::test]
async fn test_oneshot_sees_existing_documents() {
    let store = MemoryStore::new();
    store.set_document("gates", "G", json!({ "name": "front" })).await.unwrap();

    let name = Replica::oneshot(Arc::new(store), config(), |replica| async move {
        Ok(replica.repository().gate("G").unwrap().name.clone())
    })
    .await
    .unwrap();
    assert_eq!(name, "front");
}

#[tokio::test]
async fn test_oneshot_returns_decode_error_without_running_closure() {
    let store = MemoryStore::new();
    store.set_document("phones", "bad", json!({ "key": "x" })).await.unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let result = tokio::time::timeout(
        WAIT,
        Replica::oneshot(Arc::new(store), config(), move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }),
    )
    .await
    .unwrap();

    assert!(!ran.load(Ordering::SeqCst));
    let Err(CoreError::Feed(err)) = result else {
        panic!("expected a feed error");
    };
    assert!(matches!(&*err, FeedError::Decode { id, .. } if id == "bad"));
    assert_eq!(err.collection(), "phones");
}

#[tokio::test]
async fn test_custom_collection_names() {
    let store = MemoryStore::new();
    store.set_document("doors", "D", json!({})).await.unwrap();

    let replica = Replica::new(
        Arc::new(store.clone()),
        ReplicaConfig {
            gates_collection: "doors".into(),
            ..config()
        },
    );
    replica.start().await.unwrap();
    tokio::time::timeout(WAIT, replica.repository().wait_synced(Collection::Gates))
        .await
        .unwrap();
    assert!(replica.repository().gate("D").is_some());
    replica.shutdown().await;
}

// ── Timeouts ────────────────────────────────────────────────────────

/// Store whose writes take longer than any sensible command timeout.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    fn delayed<T>(&self, call: impl Future<Output = T> + Send) -> impl Future<Output = T> + Send {
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            call.await
        }
    }
}

impl DocumentStore for SlowStore {
    fn watch(&self, collection: &str) -> ChangeStream {
        self.inner.watch(collection)
    }

    fn get_documents(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send {
        self.delayed(self.inner.get_documents(collection, filter))
    }

    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send {
        self.delayed(self.inner.get_document(collection, id))
    }

    fn add_document(
        &self,
        collection: &str,
        data: Value,
    ) -> impl Future<Output = Result<String, StoreError>> + Send {
        self.delayed(self.inner.add_document(collection, data))
    }

    fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.delayed(self.inner.set_document(collection, id, data))
    }

    fn update_fields(
        &self,
        collection: &str,
        id: &str,
        patch: FieldPatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.delayed(self.inner.update_fields(collection, id, patch))
    }

    fn delete_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.delayed(self.inner.delete_document(collection, id))
    }

    fn run_transaction<T, E, F>(&self, f: F) -> impl Future<Output = Result<T, E>> + Send
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnMut(&mut dyn Transaction) -> Result<T, E> + Send,
    {
        self.delayed(self.inner.run_transaction(f))
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_call_times_out() {
    let store = SlowStore {
        inner: MemoryStore::new(),
        delay: Duration::from_secs(60),
    };
    let replica = Replica::new(Arc::new(store), config());

    let err = replica
        .commands()
        .set_rolling_code("G", 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Timeout {
            operation: "set_rolling_code",
            ..
        }
    ));

    let err = replica
        .commands()
        .create_phone(&phone_attrs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Timeout { operation: "create_phone", .. }));
}
