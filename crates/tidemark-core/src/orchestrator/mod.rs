//! Coordinated refresh of every sync domain.
//!
//! A `sync_all` run executes all push domains concurrently, waits for them,
//! then executes all pull domains concurrently. Pushing first means pulls see
//! the effect of local changes. Each domain owns one slot of the shared state
//! map and only its own task writes that slot.

mod domains;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::diffsync::DiffSyncError;
use crate::models::{DataSource, DomainReport, DomainState, EntityFamily, SyncDomain};
use crate::remote::RemoteError;

pub use domains::{
    evaluate_feeds, DiffSyncDomain, FeedHealth, FeedStatus, FeedStatusDomain, RemotePullDomain,
};

/// Which half of a coordinated run a domain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Push,
    Pull,
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    DiffSync(#[from] DiffSyncError),
    #[error(transparent)]
    Storage(#[from] crate::Error),
    #[error("Local {0} store is not authorized")]
    NotAuthorized(EntityFamily),
    #[error("Feed problems: {0}")]
    Unhealthy(String),
    /// Not a failure: the domain returns to idle.
    #[error("Skipped: {0}")]
    Skipped(String),
    #[error("Cancelled")]
    Cancelled,
}

/// One independently refreshable data family.
#[async_trait]
pub trait DomainSync: Send + Sync {
    fn domain(&self) -> SyncDomain;

    fn phase(&self) -> SyncPhase;

    async fn run(&self, cancel: &CancellationToken) -> Result<DomainReport, DomainError>;

    /// Report to show before the first run, from whatever the domain has cached.
    async fn cached_report(&self) -> Option<(DateTime<Utc>, DomainReport)> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    RunStarted,
    RunFinished { cancelled: bool },
    DomainStarted(SyncDomain),
    DomainSucceeded {
        domain: SyncDomain,
        item_count: usize,
        source: DataSource,
    },
    DomainFailed { domain: SyncDomain, reason: String },
    DomainIdle(SyncDomain),
}

pub type StateMap = BTreeMap<SyncDomain, DomainState>;

#[derive(Default)]
struct RunSlot {
    started_at: Option<Instant>,
    cancel: Option<CancellationToken>,
    handle: Option<tokio::task::AbortHandle>,
}

pub struct SyncOrchestrator {
    domains: Vec<Arc<dyn DomainSync>>,
    config: OrchestratorConfig,
    state: watch::Sender<StateMap>,
    events: broadcast::Sender<SyncEvent>,
    slot: Mutex<RunSlot>,
    /// Held for the whole of a coordinated run so runs never overlap.
    run_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(domains: Vec<Arc<dyn DomainSync>>, config: OrchestratorConfig) -> Arc<Self> {
        let initial: StateMap = domains
            .iter()
            .map(|domain| (domain.domain(), DomainState::default()))
            .collect();
        let (state, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(128);
        Arc::new(Self {
            domains,
            config,
            state,
            events,
            slot: Mutex::new(RunSlot::default()),
            run_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start a coordinated run.
    ///
    /// Returns `None` when debounced: a non-forced call within `debounce` of
    /// the previous run's start is dropped. Otherwise any in-flight run is
    /// cancelled and the handle of the new run is returned.
    pub async fn sync_all(self: &Arc<Self>, force: bool) -> Option<JoinHandle<()>> {
        let mut slot = self.slot.lock().await;
        if !force {
            if let Some(started_at) = slot.started_at {
                if started_at.elapsed() < self.config.debounce {
                    tracing::debug!(
                        since_last_ms = started_at.elapsed().as_millis(),
                        "Sync request debounced"
                    );
                    return None;
                }
            }
        }

        if let Some(previous) = slot.cancel.take() {
            tracing::info!("Cancelling in-flight sync run");
            previous.cancel();
        }

        let cancel = self.shutdown.child_token();
        let orchestrator = Arc::clone(self);
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let _running = orchestrator.run_lock.lock().await;
            orchestrator.run_all(&run_cancel).await;
        });

        slot.started_at = Some(Instant::now());
        slot.cancel = Some(cancel);
        slot.handle = Some(handle.abort_handle());
        Some(handle)
    }

    async fn run_all(&self, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            let _ = self.events.send(SyncEvent::RunFinished { cancelled: true });
            return;
        }
        let _ = self.events.send(SyncEvent::RunStarted);
        tracing::info!(domains = self.domains.len(), "Sync run started");

        for phase in [SyncPhase::Push, SyncPhase::Pull] {
            if cancel.is_cancelled() {
                break;
            }
            let runs = self
                .domains
                .iter()
                .filter(|domain| domain.phase() == phase)
                .map(|domain| self.run_domain(domain.as_ref(), cancel));
            join_all(runs).await;
        }

        let cancelled = cancel.is_cancelled();
        tracing::info!(cancelled, "Sync run finished");
        let _ = self.events.send(SyncEvent::RunFinished { cancelled });
    }

    async fn run_domain(&self, domain: &dyn DomainSync, cancel: &CancellationToken) {
        let key = domain.domain();
        if cancel.is_cancelled() {
            return;
        }
        self.state
            .send_modify(|states| states.entry(key).or_default().begin());
        let _ = self.events.send(SyncEvent::DomainStarted(key));

        let result = domain.run(cancel).await;
        let event = match result {
            Ok(report) => {
                let at = Utc::now();
                self.state
                    .send_modify(|states| states.entry(key).or_default().succeed(at, &report));
                tracing::debug!(domain = %key, items = report.item_count, "Domain synced");
                SyncEvent::DomainSucceeded {
                    domain: key,
                    item_count: report.item_count,
                    source: report.source,
                }
            }
            Err(DomainError::Cancelled | DomainError::Skipped(_)) => {
                self.state
                    .send_modify(|states| states.entry(key).or_default().cancel());
                SyncEvent::DomainIdle(key)
            }
            Err(error) => {
                let reason = error.to_string();
                tracing::warn!(domain = %key, %reason, "Domain sync failed");
                self.state
                    .send_modify(|states| states.entry(key).or_default().fail(reason.clone()));
                SyncEvent::DomainFailed {
                    domain: key,
                    reason,
                }
            }
        };
        let _ = self.events.send(event);
    }

    /// Run a single domain outside the coordinated flow. Returns the domain's
    /// state afterwards, or `None` if no such domain is registered.
    pub async fn sync(&self, domain: SyncDomain) -> Option<DomainState> {
        let runner = self.domains.iter().find(|runner| runner.domain() == domain)?;
        let cancel = self.shutdown.child_token();
        self.run_domain(runner.as_ref(), &cancel).await;
        self.snapshot().get(&domain).cloned()
    }

    /// Populate domains that have never succeeded from their caches.
    pub async fn seed_from_cache(&self) {
        for domain in &self.domains {
            let Some((at, report)) = domain.cached_report().await else {
                continue;
            };
            let key = domain.domain();
            self.state.send_if_modified(|states| {
                let state = states.entry(key).or_default();
                if state.last_success_at.is_some() || state.is_syncing() {
                    return false;
                }
                state.succeed(at, &report);
                true
            });
        }
    }

    /// Cancel the in-flight coordinated run, if any.
    pub async fn cancel(&self) {
        if let Some(cancel) = self.slot.lock().await.cancel.take() {
            cancel.cancel();
        }
    }

    /// Cancel everything, including single-domain runs, for good.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn snapshot(&self) -> StateMap {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<StateMap> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn any_syncing(&self) -> bool {
        self.state.borrow().values().any(DomainState::is_syncing)
    }

    pub async fn is_syncing_all(&self) -> bool {
        self.slot
            .lock()
            .await
            .handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
