// ── Feed adapter ──
//
// Watch loop for one collection: open → decode → forward; on a
// resumable failure, backoff → reopen. Every reopen starts with a fresh
// initial snapshot, so the repository resyncs from scratch.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use opener_store::{ChangeKind, DocumentChange, DocumentStore};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{ChangeEvent, Decode, FeedError, FeedMessage};
use crate::config::{DecodePolicy, ReconnectConfig};

/// How a single watch ended.
enum WatchOutcome {
    /// The receiving side hung up; nothing left to feed.
    SinkClosed,
    Failed(FeedError),
}

/// Turns a store collection watch into an ordered stream of
/// [`FeedMessage`]s for entity type `T`.
pub struct FeedAdapter<S, T> {
    store: Arc<S>,
    collection: String,
    reconnect: ReconnectConfig,
    decode_policy: DecodePolicy,
    errors: broadcast::Sender<Arc<FeedError>>,
    _entity: PhantomData<fn() -> T>,
}

impl<S: DocumentStore, T: Decode> FeedAdapter<S, T> {
    /// Create an adapter for `collection`. Errors are published on
    /// `errors`; nobody needs to be subscribed.
    pub fn new(
        store: Arc<S>,
        collection: impl Into<String>,
        errors: broadcast::Sender<Arc<FeedError>>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            reconnect: ReconnectConfig::default(),
            decode_policy: DecodePolicy::default(),
            errors,
            _entity: PhantomData,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Run until cancelled, until `sink` is closed, or until a terminal
    /// error. Terminal errors are published on the error channel and
    /// returned.
    pub async fn run(
        &self,
        sink: mpsc::Sender<FeedMessage<T>>,
        cancel: CancellationToken,
    ) -> Result<(), Arc<FeedError>> {
        let mut attempt: u32 = 0;

        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                outcome = self.watch_once(&sink, &mut attempt) => outcome,
            };

            let err = match outcome {
                WatchOutcome::SinkClosed => {
                    debug!(collection = %self.collection, "feed receiver closed");
                    break;
                }
                WatchOutcome::Failed(err) => Arc::new(err),
            };

            let resumable = self.is_resumable(&err);
            warn!(collection = %self.collection, error = %err, resumable, attempt, "feed error");
            // No subscribers just means nobody is listening for errors.
            let _ = self.errors.send(Arc::clone(&err));

            if !resumable {
                error!(collection = %self.collection, "feed stopped");
                return Err(err);
            }
            if let Some(max) = self.reconnect.max_retries {
                if attempt >= max {
                    error!(
                        collection = %self.collection,
                        max_retries = max,
                        "watch reopen limit reached, giving up"
                    );
                    return Err(err);
                }
            }

            let delay = reopen_delay(&self.collection, attempt, &self.reconnect);
            info!(
                collection = %self.collection,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "waiting before reopening watch"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }

        debug!(collection = %self.collection, "feed loop exiting");
        Ok(())
    }

    fn is_resumable(&self, err: &FeedError) -> bool {
        match err {
            FeedError::Decode { .. } => self.decode_policy == DecodePolicy::Resume,
            FeedError::Store { source, .. } => source.is_resumable(),
            FeedError::Closed { .. } => false,
        }
    }

    /// Open one watch and forward its batches until it fails.
    async fn watch_once(
        &self,
        sink: &mpsc::Sender<FeedMessage<T>>,
        attempt: &mut u32,
    ) -> WatchOutcome {
        debug!(collection = %self.collection, "opening watch");
        let mut stream = self.store.watch(&self.collection);

        while let Some(item) = stream.next().await {
            let batch = match item {
                Ok(batch) => batch,
                Err(source) => {
                    return WatchOutcome::Failed(FeedError::Store {
                        collection: self.collection.clone(),
                        source,
                    });
                }
            };
            trace!(
                collection = %self.collection,
                changes = batch.changes.len(),
                initial = batch.initial,
                "batch received"
            );

            let synced_ids: Option<Vec<String>> = batch
                .initial
                .then(|| batch.changes.iter().map(|c| c.doc_id.clone()).collect());

            for change in batch.changes {
                let event = match self.decode(change) {
                    Ok(event) => event,
                    Err(err) => return WatchOutcome::Failed(err),
                };
                if sink.send(FeedMessage::Change(event)).await.is_err() {
                    return WatchOutcome::SinkClosed;
                }
            }

            if let Some(ids) = synced_ids {
                let count = ids.len();
                if sink.send(FeedMessage::Synced { ids }).await.is_err() {
                    return WatchOutcome::SinkClosed;
                }
                *attempt = 0;
                debug!(collection = %self.collection, documents = count, "initial snapshot delivered");
            }
        }

        WatchOutcome::Failed(FeedError::Closed {
            collection: self.collection.clone(),
        })
    }

    fn decode(&self, change: DocumentChange) -> Result<ChangeEvent<T>, FeedError> {
        let DocumentChange { kind, doc_id, data } = change;
        match kind {
            ChangeKind::Removed => Ok(ChangeEvent::removed(doc_id)),
            ChangeKind::Added | ChangeKind::Modified => match T::decode(&doc_id, &data) {
                Ok(entity) => Ok(ChangeEvent {
                    kind,
                    id: doc_id,
                    entity: Some(entity),
                }),
                Err(source) => Err(FeedError::Decode {
                    collection: self.collection.clone(),
                    id: doc_id,
                    source,
                }),
            },
        }
    }
}

// ── Reopen delay ─────────────────────────────────────────────────────

/// Delay before reopening `collection`'s watch after `attempt` failures
/// in a row.
///
/// The step doubles from `initial_delay` and stops at `max_delay`. The
/// delay lands in the upper quarter of the step, at a point derived from
/// the collection name and attempt, so the gate and phone feeds of one
/// replica do not hit a recovering store at the same instant.
fn reopen_delay(collection: &str, attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
    let step = config.initial_delay.saturating_mul(factor).min(config.max_delay);

    let seed = collection
        .bytes()
        .fold(attempt, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    let quarter = step / 4;
    step - quarter + quarter.mul_f64(f64::from(seed % 1000) / 1000.0)
}

// ── Tests ────────────────────────────────────────────────────────────
