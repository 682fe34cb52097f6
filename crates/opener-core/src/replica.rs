// ── Replica lifecycle ──
//
// Wires one feed task and one apply task per collection to a shared
// repository, and exposes the command layer alongside. Feed tasks are
// the only writers of repository state. A replica can be started again
// after it stopped or failed; the repository is kept and the new feeds
// resync it from fresh snapshots.

use std::sync::Arc;

use opener_store::DocumentStore;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::command::{Command, CommandResult, DeviceCommands};
use crate::config::ReplicaConfig;
use crate::error::CoreError;
use crate::feed::{Decode, FeedAdapter, FeedError, FeedMessage};
use crate::model::{Collection, Gate, Phone};
use crate::phone::{LogNotifier, Notifier};
use crate::store::DeviceRepository;

const ERROR_CHANNEL_SIZE: usize = 64;

// ── ReplicaState ─────────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    Idle,
    Running,
    Stopped,
    /// A feed hit a terminal error. The other feed keeps running and the
    /// repository keeps the last applied state.
    Failed,
}

// ── Replica ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ReplicaInner>`.
pub struct Replica<S: DocumentStore> {
    inner: Arc<ReplicaInner<S>>,
}

impl<S: DocumentStore> Clone for Replica<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ReplicaInner<S: DocumentStore> {
    config: ReplicaConfig,
    store: Arc<S>,
    repository: Arc<DeviceRepository>,
    commands: DeviceCommands<S>,
    errors: broadcast::Sender<Arc<FeedError>>,
    /// First terminal feed error of the current run.
    failure: watch::Sender<Option<Arc<FeedError>>>,
    state: watch::Sender<ReplicaState>,
    run: Mutex<Run>,
}

/// Tasks of one `start()` and the token that stops them.
struct Run {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Run {
    /// Cancel the tasks and wait for them to finish.
    async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

impl<S: DocumentStore> Replica<S> {
    /// Create a replica over `store`. Does NOT start watching -- call
    /// [`start()`](Self::start).
    pub fn new(store: Arc<S>, config: ReplicaConfig) -> Self {
        Self::with_notifier(store, config, Arc::new(LogNotifier))
    }

    pub fn with_notifier(store: Arc<S>, config: ReplicaConfig, notifier: Arc<dyn Notifier>) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_SIZE);
        let (failure, _) = watch::channel(None);
        let (state, _) = watch::channel(ReplicaState::Idle);
        let commands = DeviceCommands::new(Arc::clone(&store), &config);

        Self {
            inner: Arc::new(ReplicaInner {
                config,
                store,
                repository: Arc::new(DeviceRepository::with_notifier(notifier)),
                commands,
                errors,
                failure,
                state,
                run: Mutex::new(Run {
                    cancel: CancellationToken::new(),
                    handles: Vec::new(),
                }),
            }),
        }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.inner.config
    }

    pub fn repository(&self) -> &Arc<DeviceRepository> {
        &self.inner.repository
    }

    pub fn commands(&self) -> &DeviceCommands<S> {
        &self.inner.commands
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the gate and phone feeds. Returns immediately; use
    /// [`wait_synced()`](Self::wait_synced) to wait for the first snapshots.
    ///
    /// Allowed from every state except `Running`. After a stop or a
    /// failure, leftover tasks are joined first and the repository keeps
    /// its entries until the new snapshots arrive.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut run = self.inner.run.lock().await;
        if *self.inner.state.borrow() == ReplicaState::Running {
            return Err(CoreError::AlreadyRunning);
        }

        // A failed run can still have its other feed going.
        run.stop().await;
        run.cancel = CancellationToken::new();
        self.inner.failure.send_replace(None);
        self.inner.repository.clear_synced();

        let Run { cancel, handles } = &mut *run;
        self.spawn_feed::<Gate>(
            Collection::Gates,
            DeviceRepository::apply_gate_message,
            cancel,
            handles,
        );
        self.spawn_feed::<Phone>(
            Collection::Phones,
            DeviceRepository::apply_phone_message,
            cancel,
            handles,
        );

        self.inner.state.send_replace(ReplicaState::Running);
        info!(
            gates = %self.inner.config.gates_collection,
            phones = %self.inner.config.phones_collection,
            "replica started"
        );
        Ok(())
    }

    /// Cancel the feeds and wait for their tasks. Applied state is kept.
    pub async fn shutdown(&self) {
        self.inner.run.lock().await.stop().await;

        self.inner.state.send_if_modified(|state| {
            if *state == ReplicaState::Failed {
                return false;
            }
            *state = ReplicaState::Stopped;
            true
        });
        debug!("replica stopped");
    }

    /// Wait until both collections have delivered their first snapshot of
    /// the current run. Fails with [`CoreError::Feed`] if a feed stops on a
    /// terminal error first.
    pub async fn wait_synced(&self) -> Result<(), CoreError> {
        let repo = &self.inner.repository;
        let synced = async {
            tokio::join!(
                repo.wait_synced(Collection::Gates),
                repo.wait_synced(Collection::Phones)
            );
        };
        tokio::select! {
            biased;
            () = synced => Ok(()),
            err = self.failed() => Err(CoreError::Feed(err)),
        }
    }

    /// One-shot: start, wait for the first snapshots, run `f`, shut down.
    pub async fn oneshot<F, Fut, T>(store: Arc<S>, config: ReplicaConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Replica<S>) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let replica = Replica::new(store, config);
        replica.start().await?;
        if let Err(err) = replica.wait_synced().await {
            replica.shutdown().await;
            return Err(err);
        }
        let result = f(replica.clone()).await;
        replica.shutdown().await;
        result
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Execute a command against the store. The effect shows up in the
    /// repository once the feed delivers it.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        self.inner.commands.execute(cmd).await
    }

    // ── State observation ────────────────────────────────────────────

    /// Subscribe to feed errors: decode failures, store failures, and
    /// watches closed by the store.
    pub fn errors(&self) -> broadcast::Receiver<Arc<FeedError>> {
        self.inner.errors.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ReplicaState> {
        self.inner.state.subscribe()
    }

    /// The terminal error that failed the current run, if any.
    pub fn failure(&self) -> Option<Arc<FeedError>> {
        self.inner.failure.borrow().clone()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Resolves with the first terminal feed error of the current run.
    async fn failed(&self) -> Arc<FeedError> {
        let mut rx = self.inner.failure.subscribe();
        loop {
            if let Some(err) = rx.borrow_and_update().clone() {
                return err;
            }
            // The sender lives in `self`, so `changed` cannot fail here.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    fn spawn_feed<T: Decode>(
        &self,
        collection: Collection,
        apply: fn(&DeviceRepository, FeedMessage<T>),
        cancel: &CancellationToken,
        handles: &mut Vec<JoinHandle<()>>,
    ) {
        let config = &self.inner.config;
        let (tx, mut rx) = mpsc::channel(config.channel_capacity.max(1));

        let adapter = FeedAdapter::<S, T>::new(
            Arc::clone(&self.inner.store),
            config.collection_name(collection),
            self.inner.errors.clone(),
        )
        .with_reconnect(config.reconnect.clone())
        .with_decode_policy(config.decode_policy);

        let cancel = cancel.child_token();
        let replica = self.clone();
        handles.push(tokio::spawn(async move {
            if let Err(err) = adapter.run(tx, cancel).await {
                error!(%collection, error = %err, "feed failed, replica degraded");
                replica.inner.failure.send_if_modified(|failure| {
                    if failure.is_some() {
                        return false;
                    }
                    *failure = Some(err);
                    true
                });
                replica.inner.state.send_replace(ReplicaState::Failed);
            }
        }));

        let repository = Arc::clone(&self.inner.repository);
        handles.push(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                apply(&repository, message);
            }
            debug!(%collection, "apply task exiting");
        }));
    }
}
