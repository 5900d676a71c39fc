//! Durable retry queue for outbound mutations.
//!
//! A mutation enters the queue only after its live attempt failed with a
//! transient error. Each drain pass replays a priority-ordered snapshot of the
//! persisted list once; items that exhaust their retry budget move to the
//! failed store, where they stay until the user retries or discards them.

mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::classify::{classify, ErrorClass};
use crate::config::QueueConfig;
use crate::conflict::ConflictResolver;
use crate::models::{FailedMutation, MutationId, MutationKind, Priority, QueuedMutation};
use crate::rate_limit::RateLimiter;
use crate::remote::{CredentialProvider, MutationTransport, RemoteError};
use crate::services::BlobStore;
use crate::Result;

pub use store::{FAILED_KEY, QUEUE_KEY};
use store::{drain_order, eviction_candidate, position, QueueStore, EVICTED_ERROR};

/// Outcome of a live mutation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Delivered,
    /// Saved locally; will be replayed. Not yet persisted remotely.
    Queued { id: MutationId, pending: usize },
    /// The remote already had an equivalent write.
    ConflictResolved { message: String },
}

impl SubmitOutcome {
    /// Whether the remote store holds the write.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self, Self::Delivered | Self::ConflictResolved { .. })
    }

    #[must_use]
    pub const fn was_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Not retryable; shown to the user as-is.
    #[error("{message}")]
    Rejected { class: ErrorClass, message: String },
    #[error(transparent)]
    Storage(#[from] crate::Error),
}

impl SubmitError {
    #[must_use]
    pub const fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Rejected { class, .. } => Some(*class),
            Self::Storage(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueueEvent {
    Enqueued {
        id: MutationId,
        description: String,
        pending: usize,
    },
    Delivered {
        id: MutationId,
    },
    ConflictResolved {
        id: MutationId,
    },
    /// Standing, dismissible notification for the UI.
    PermanentlyFailed {
        id: MutationId,
        description: String,
        last_error: String,
    },
    DrainFinished(DrainReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainSkip {
    AlreadyRunning,
    MissingApiKey,
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub delivered: usize,
    pub conflicts_resolved: usize,
    pub retried: usize,
    pub failed: usize,
    pub remaining: usize,
    /// The pass stopped early on a rate-limit refusal.
    pub rate_limited: bool,
    /// The pass stopped early on a credential problem.
    pub auth_failed: bool,
    pub skipped: Option<DrainSkip>,
    #[serde(skip)]
    pub next_drain_in: Option<Duration>,
}

impl DrainReport {
    const fn skipped(reason: DrainSkip) -> Self {
        Self {
            attempted: 0,
            delivered: 0,
            conflicts_resolved: 0,
            retried: 0,
            failed: 0,
            remaining: 0,
            rate_limited: false,
            auth_failed: false,
            skipped: Some(reason),
            next_drain_in: None,
        }
    }
}

/// Delay before the next drain: `min(base * 2^retry_count, cap)`.
#[must_use]
pub fn backoff_delay(config: &QueueConfig, worst_retry_count: u32) -> Duration {
    let factor = 2_u32.checked_pow(worst_retry_count).unwrap_or(u32::MAX);
    config
        .backoff_base
        .checked_mul(factor)
        .map_or(config.backoff_cap, |delay| delay.min(config.backoff_cap))
}

enum ItemOutcome {
    Remove,
    Retry(u32),
    Fail(String),
}

#[derive(Clone)]
pub struct RetryQueue {
    inner: Arc<Inner>,
}

struct Inner {
    store: QueueStore,
    transport: Arc<dyn MutationTransport>,
    limiter: RateLimiter,
    resolver: ConflictResolver,
    credentials: Arc<dyn CredentialProvider>,
    config: QueueConfig,
    is_processing: AtomicBool,
    /// Serializes read-modify-write cycles on the two blobs.
    io: Mutex<()>,
    backoff: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    events: broadcast::Sender<QueueEvent>,
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RetryQueue {
    pub fn new(
        blobs: BlobStore,
        transport: Arc<dyn MutationTransport>,
        limiter: RateLimiter,
        resolver: ConflictResolver,
        credentials: Arc<dyn CredentialProvider>,
        config: QueueConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                store: QueueStore::new(blobs),
                transport,
                limiter,
                resolver,
                credentials,
                config,
                is_processing: AtomicBool::new(false),
                io: Mutex::new(()),
                backoff: Mutex::new(None),
                shutdown: CancellationToken::new(),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.inner.resolver
    }

    pub fn is_processing(&self) -> bool {
        self.inner.is_processing.load(Ordering::Acquire)
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Live attempt with offline fallback.
    ///
    /// Only transient failures are queued. Anything else is returned to the
    /// caller and never enters the queue.
    pub async fn submit(
        &self,
        kind: MutationKind,
        priority: Priority,
    ) -> std::result::Result<SubmitOutcome, SubmitError> {
        if let Err(error) = kind.validate() {
            return Err(SubmitError::Rejected {
                class: ErrorClass::ClientError,
                message: error.to_string(),
            });
        }

        let endpoint = kind.endpoint();
        let attempt = match self.inner.limiter.check("POST", &endpoint).await {
            Ok(()) => self.inner.transport.send(&kind).await,
            Err(limited) => Err(RemoteError::from(limited)),
        };

        let error = match attempt {
            Ok(()) => {
                tracing::debug!(kind = kind.name(), "Mutation delivered");
                return Ok(SubmitOutcome::Delivered);
            }
            Err(RemoteError::Conflict { body }) => {
                if let Some(resolved) = self.inner.resolver.resolve(&body, &kind.describe()).await {
                    return Ok(SubmitOutcome::ConflictResolved {
                        message: resolved.description,
                    });
                }
                RemoteError::Conflict { body }
            }
            Err(error) => error,
        };

        let class = classify(&error);
        tracing::debug!(kind = kind.name(), class = %class, %error, "Mutation attempt failed");
        if !class.should_queue() {
            return Err(SubmitError::Rejected {
                class,
                message: format!("{} ({error})", class.user_message()),
            });
        }

        let queued = self.enqueue(kind, priority).await?;
        let pending = self.pending_count().await?;
        Ok(SubmitOutcome::Queued {
            id: queued.id,
            pending,
        })
    }

    /// Persist a mutation for later replay.
    ///
    /// At capacity the oldest entry of the lowest tier present moves to the
    /// failed store; the new entry is always kept.
    pub async fn enqueue(&self, kind: MutationKind, priority: Priority) -> Result<QueuedMutation> {
        self.enqueue_item(QueuedMutation::new(kind, priority)).await
    }

    async fn enqueue_item(&self, item: QueuedMutation) -> Result<QueuedMutation> {
        let io_guard = self.inner.io.lock().await;
        let (mut pending, mut failed) = self.inner.store.load_consistent().await?;
        let evicted = self.admit(&mut pending, &mut failed, item.clone());
        self.inner.store.save_both(&pending, &failed).await?;
        drop(io_guard);

        tracing::info!(
            id = %item.id,
            kind = item.kind.name(),
            priority = %item.priority,
            pending = pending.len(),
            "Mutation queued for retry"
        );
        self.announce_enqueued(&item, pending.len(), evicted);
        Ok(item)
    }

    /// Append `item` to `pending`, moving the eviction candidate to `failed`
    /// while at capacity. Returns the evicted entries.
    fn admit(
        &self,
        pending: &mut Vec<QueuedMutation>,
        failed: &mut Vec<FailedMutation>,
        item: QueuedMutation,
    ) -> Vec<FailedMutation> {
        let mut evicted = Vec::new();
        while pending.len() >= self.inner.config.capacity {
            let Some(index) = eviction_candidate(pending) else {
                break;
            };
            let victim = pending.remove(index);
            tracing::warn!(id = %victim.id, kind = victim.kind.name(), "Queue at capacity; evicting entry");
            evicted.push(FailedMutation::new(victim, EVICTED_ERROR));
        }
        failed.extend(evicted.iter().cloned());
        pending.push(item);
        evicted
    }

    fn announce_enqueued(&self, item: &QueuedMutation, pending: usize, evicted: Vec<FailedMutation>) {
        for entry in evicted {
            self.emit(QueueEvent::PermanentlyFailed {
                id: entry.id(),
                description: entry.mutation.kind.describe(),
                last_error: entry.last_error,
            });
        }
        self.emit(QueueEvent::Enqueued {
            id: item.id,
            description: item.kind.describe(),
            pending,
        });
    }

    /// Drain the persisted queue once. A no-op while another drain runs.
    pub async fn process_queue(&self) -> Result<DrainReport> {
        let Some(_guard) = ProcessingGuard::acquire(&self.inner.is_processing) else {
            tracing::debug!("Queue drain already running");
            return Ok(DrainReport::skipped(DrainSkip::AlreadyRunning));
        };
        self.cancel_backoff().await;

        if self.inner.credentials.api_key().is_none() {
            tracing::debug!("No API key; skipping queue drain");
            return Ok(DrainReport::skipped(DrainSkip::MissingApiKey));
        }

        let snapshot = {
            let _io = self.inner.io.lock().await;
            let (pending, _) = self.inner.store.load_consistent().await?;
            drain_order(pending)
        };
        if snapshot.is_empty() {
            return Ok(DrainReport::skipped(DrainSkip::Empty));
        }

        tracing::info!(pending = snapshot.len(), "Draining retry queue");
        let mut report = DrainReport::default();
        let mut outcomes: HashMap<MutationId, ItemOutcome> = HashMap::new();

        for item in &snapshot {
            if let Err(limited) = self.inner.limiter.check("POST", &item.kind.endpoint()).await {
                tracing::info!(
                    retry_after_secs = limited.retry_after_secs,
                    "Rate limited; stopping drain pass"
                );
                report.rate_limited = true;
                break;
            }

            report.attempted += 1;
            let error = match self.inner.transport.send(&item.kind).await {
                Ok(()) => {
                    report.delivered += 1;
                    outcomes.insert(item.id, ItemOutcome::Remove);
                    self.emit(QueueEvent::Delivered { id: item.id });
                    continue;
                }
                Err(RemoteError::Conflict { body }) => {
                    if self
                        .inner
                        .resolver
                        .handle_conflict_response(&body, &item.kind.describe())
                        .await
                    {
                        report.conflicts_resolved += 1;
                        outcomes.insert(item.id, ItemOutcome::Remove);
                        self.emit(QueueEvent::ConflictResolved { id: item.id });
                        continue;
                    }
                    RemoteError::Conflict { body }
                }
                Err(error) => error,
            };

            match classify(&error) {
                ErrorClass::Transient => {
                    let retry_count = item.retry_count.saturating_add(1);
                    if retry_count >= self.inner.config.max_retries {
                        report.failed += 1;
                        outcomes.insert(item.id, ItemOutcome::Fail(error.to_string()));
                    } else {
                        report.retried += 1;
                        outcomes.insert(item.id, ItemOutcome::Retry(retry_count));
                    }
                }
                ErrorClass::AuthError => {
                    tracing::warn!(%error, "Credentials rejected; stopping drain pass");
                    report.attempted -= 1;
                    report.auth_failed = true;
                    break;
                }
                class @ (ErrorClass::ClientError | ErrorClass::Permanent) => {
                    tracing::warn!(id = %item.id, class = %class, %error, "Queued mutation rejected");
                    report.failed += 1;
                    outcomes.insert(item.id, ItemOutcome::Fail(error.to_string()));
                }
            }
        }

        let (remaining, newly_failed) = self.merge_outcomes(outcomes).await?;
        report.remaining = remaining.len();

        for entry in newly_failed {
            tracing::warn!(
                id = %entry.id(),
                kind = entry.mutation.kind.name(),
                last_error = %entry.last_error,
                "Mutation permanently failed"
            );
            self.emit(QueueEvent::PermanentlyFailed {
                id: entry.id(),
                description: entry.mutation.kind.describe(),
                last_error: entry.last_error,
            });
        }

        if let Some(worst) = remaining.iter().map(|item| item.retry_count).max() {
            let delay = backoff_delay(&self.inner.config, worst);
            report.next_drain_in = Some(delay);
            self.schedule_drain(delay).await;
        }

        tracing::info!(
            attempted = report.attempted,
            delivered = report.delivered,
            retried = report.retried,
            failed = report.failed,
            remaining = report.remaining,
            "Queue drain finished"
        );
        self.emit(QueueEvent::DrainFinished(report.clone()));
        Ok(report)
    }

    /// Apply a pass's outcomes to the current persisted state. Items enqueued
    /// or discarded while the pass ran are respected.
    async fn merge_outcomes(
        &self,
        mut outcomes: HashMap<MutationId, ItemOutcome>,
    ) -> Result<(Vec<QueuedMutation>, Vec<FailedMutation>)> {
        let _io = self.inner.io.lock().await;
        let (current, mut failed) = self.inner.store.load_consistent().await?;

        let mut remaining = Vec::with_capacity(current.len());
        let mut newly_failed = Vec::new();
        for mut item in current {
            match outcomes.remove(&item.id) {
                None => remaining.push(item),
                Some(ItemOutcome::Remove) => {}
                Some(ItemOutcome::Retry(retry_count)) => {
                    item.retry_count = retry_count;
                    remaining.push(item);
                }
                Some(ItemOutcome::Fail(last_error)) => {
                    item.retry_count = item.retry_count.saturating_add(1);
                    newly_failed.push(FailedMutation::new(item, last_error));
                }
            }
        }

        failed.extend(newly_failed.iter().cloned());
        self.inner.store.save_both(&remaining, &failed).await?;
        Ok((remaining, newly_failed))
    }

    fn boxed_drain(self) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(error) = self.process_queue().await {
                tracing::warn!(%error, "Scheduled queue drain failed");
            }
        })
    }

    async fn schedule_drain(&self, delay: Duration) {
        let token = self.inner.shutdown.child_token();
        if let Some(previous) = self.inner.backoff.lock().await.replace(token.clone()) {
            previous.cancel();
        }
        tracing::debug!(delay_secs = delay.as_secs_f64(), "Next queue drain scheduled");

        let drain = self.clone().boxed_drain();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => drain.await,
            }
        });
    }

    async fn cancel_backoff(&self) {
        if let Some(token) = self.inner.backoff.lock().await.take() {
            token.cancel();
        }
    }

    /// Drain on every offline-to-online transition until [`Self::shutdown`].
    pub fn start(&self, mut connectivity: watch::Receiver<bool>) -> JoinHandle<()> {
        let queue = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let mut was_online = *connectivity.borrow_and_update();
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *connectivity.borrow_and_update();
                        if online && !was_online {
                            tracing::info!("Connectivity restored; draining retry queue");
                            queue.cancel_backoff().await;
                            if let Err(error) = queue.process_queue().await {
                                tracing::warn!(%error, "Queue drain after reconnect failed");
                            }
                        }
                        was_online = online;
                    }
                }
            }
        })
    }

    /// Stop the connectivity watcher and any pending backoff.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub async fn pending_items(&self) -> Result<Vec<QueuedMutation>> {
        let _io = self.inner.io.lock().await;
        let (pending, _) = self.inner.store.load_consistent().await?;
        Ok(drain_order(pending))
    }

    pub async fn failed_items(&self) -> Result<Vec<FailedMutation>> {
        let _io = self.inner.io.lock().await;
        self.inner.store.load_failed().await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.pending_items().await?.len())
    }

    pub async fn failed_count(&self) -> Result<usize> {
        Ok(self.failed_items().await?.len())
    }

    /// Move a failed item back into the queue at high priority with a fresh
    /// retry budget. Returns `false` if no such item exists.
    pub async fn retry_failed_item(&self, id: MutationId) -> Result<bool> {
        let io_guard = self.inner.io.lock().await;
        let (mut pending, mut failed) = self.inner.store.load_consistent().await?;
        let Some(index) = failed.iter().position(|entry| entry.id() == id) else {
            return Ok(false);
        };

        let mut item = failed.remove(index).mutation;
        item.retry_count = 0;
        item.priority = Priority::High;
        let evicted = self.admit(&mut pending, &mut failed, item.clone());
        self.inner.store.save_both(&pending, &failed).await?;
        drop(io_guard);

        tracing::info!(%id, pending = pending.len(), "Failed mutation moved back to the queue");
        self.announce_enqueued(&item, pending.len(), evicted);
        Ok(true)
    }

    pub async fn discard_failed_item(&self, id: MutationId) -> Result<bool> {
        let _io = self.inner.io.lock().await;
        let mut failed = self.inner.store.load_failed().await?;
        let before = failed.len();
        failed.retain(|entry| entry.id() != id);
        if failed.len() == before {
            return Ok(false);
        }
        self.inner.store.save_failed(&failed).await?;
        tracing::info!(%id, "Discarded failed mutation");
        Ok(true)
    }

    pub async fn clear_failed_items(&self) -> Result<usize> {
        let _io = self.inner.io.lock().await;
        let failed = self.inner.store.load_failed().await?;
        self.inner.store.save_failed(&[]).await?;
        Ok(failed.len())
    }

    /// Explicit user discard of a pending item.
    pub async fn discard_queued(&self, id: MutationId) -> Result<bool> {
        let _io = self.inner.io.lock().await;
        let mut pending = self.inner.store.load_pending().await?;
        let Some(index) = position(&pending, id) else {
            return Ok(false);
        };
        pending.remove(index);
        self.inner.store.save_pending(&pending).await?;
        tracing::info!(%id, "Discarded queued mutation");
        Ok(true)
    }

    pub async fn clear_queue(&self) -> Result<usize> {
        let _io = self.inner.io.lock().await;
        let pending = self.inner.store.load_pending().await?;
        self.inner.store.save_pending(&[]).await?;
        Ok(pending.len())
    }
}
