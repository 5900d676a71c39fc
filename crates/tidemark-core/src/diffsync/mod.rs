//! Bidirectional reconciliation of one local collection against its remote
//! counterpart.
//!
//! A pass runs six phases:
//!
//! 1. enumerate local records in the rolling window
//! 2. fetch the remote sync state
//! 3. send new and locally edited records in one batch
//! 4. write remote pending pushes into the local store
//! 5. delete tombstoned records locally
//! 6. confirm phases 4 and 5 back to the remote
//!
//! Failures in phases 1 to 3 abort the pass before anything is written
//! locally. Per-record failures in phases 4 and 5 are skipped; the record
//! keeps its remote status and is retried on the next pass.

mod plan;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::DiffSyncConfig;
use crate::models::{
    ConfirmAction, EntityFamily, LocalRecord, RecordFields, RemoteRecord, SyncBatch,
    SyncConfirmation, SyncStatus, SyncWindow,
};
use crate::remote::{RemoteError, SyncStateRemote};

/// Authorization state of a local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalAuthorization {
    Authorized,
    Denied,
    NotDetermined,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalStoreError {
    #[error("Local record not found: {0}")]
    NotFound(String),
    #[error("Local store error: {0}")]
    Store(String),
}

/// Where a write into the local store goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertTarget {
    Create,
    Update(String),
}

/// Platform store that holds the local copy of one entity family.
#[async_trait]
pub trait LocalRecordProvider: Send + Sync {
    async fn authorization(&self) -> LocalAuthorization;

    async fn list_local_records(
        &self,
        window: SyncWindow,
    ) -> Result<Vec<LocalRecord>, LocalStoreError>;

    /// Look a record up by identifier regardless of the sync window.
    async fn get_local(&self, local_id: &str) -> Result<Option<LocalRecord>, LocalStoreError>;

    /// Returns the record as stored, including its new modification time.
    async fn upsert_local(
        &self,
        target: UpsertTarget,
        fields: &RecordFields,
    ) -> Result<LocalRecord, LocalStoreError>;

    /// Returns `false` when nothing needed deleting.
    async fn delete_local(&self, local_id: &str) -> Result<bool, LocalStoreError>;
}

#[derive(Debug, Error)]
pub enum DiffSyncError {
    #[error(transparent)]
    LocalStore(#[from] LocalStoreError),
    #[error("Local store did not answer {operation} in time")]
    LocalTimeout { operation: &'static str },
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Sync pass cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    Completed,
    NotAuthorized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffSyncReport {
    pub family: EntityFamily,
    pub outcome: PassOutcome,
    pub local_count: usize,
    pub remote_count: usize,
    pub upserted_to_remote: usize,
    pub batch_sent: bool,
    pub pushed_to_local: usize,
    pub deleted_local: usize,
    pub skipped_records: usize,
    pub confirmations: usize,
}

impl DiffSyncReport {
    const fn empty(family: EntityFamily, outcome: PassOutcome) -> Self {
        Self {
            family,
            outcome,
            local_count: 0,
            remote_count: 0,
            upserted_to_remote: 0,
            batch_sent: false,
            pushed_to_local: 0,
            deleted_local: 0,
            skipped_records: 0,
            confirmations: 0,
        }
    }

    /// Whether the pass changed anything on either side.
    #[must_use]
    pub const fn wrote_anything(&self) -> bool {
        self.upserted_to_remote > 0
            || self.pushed_to_local > 0
            || self.deleted_local > 0
            || self.confirmations > 0
    }
}

pub struct DiffSynchronizer {
    family: EntityFamily,
    local: Arc<dyn LocalRecordProvider>,
    remote: Arc<dyn SyncStateRemote>,
    config: DiffSyncConfig,
}

impl DiffSynchronizer {
    pub fn new(
        family: EntityFamily,
        local: Arc<dyn LocalRecordProvider>,
        remote: Arc<dyn SyncStateRemote>,
        config: DiffSyncConfig,
    ) -> Self {
        Self {
            family,
            local,
            remote,
            config,
        }
    }

    pub const fn family(&self) -> EntityFamily {
        self.family
    }

    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Result<T, DiffSyncError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.config.local_timeout, call)
            .await
            .map_err(|_| DiffSyncError::LocalTimeout { operation })
    }

    fn ensure_active(cancel: &CancellationToken) -> Result<(), DiffSyncError> {
        if cancel.is_cancelled() {
            Err(DiffSyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Phase 4 target for a pending push. Records edited elsewhere may have
    /// moved outside the window, so an unseen identifier is looked up in the
    /// store before falling back to the heuristic match.
    async fn locate(
        &self,
        record: &RemoteRecord,
        locals: &BTreeMap<String, LocalRecord>,
    ) -> Result<UpsertTarget, DiffSyncError> {
        if plan::needs_store_lookup(record, locals) {
            let existing = self
                .guarded("get_local", self.local.get_local(&record.local_id))
                .await??;
            if let Some(existing) = existing {
                return Ok(UpsertTarget::Update(existing.local_id));
            }
        }
        Ok(plan::resolve_target(record, locals))
    }

    /// Run one pass. Cancellation is honoured up to phase 4; once local
    /// writes start the pass runs to completion.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<DiffSyncReport, DiffSyncError> {
        let family = self.family;
        Self::ensure_active(cancel)?;

        let authorization = self.guarded("authorization", self.local.authorization()).await?;
        if authorization != LocalAuthorization::Authorized {
            tracing::info!(%family, ?authorization, "Local store not authorized; skipping pass");
            return Ok(DiffSyncReport::empty(family, PassOutcome::NotAuthorized));
        }
        let mut report = DiffSyncReport::empty(family, PassOutcome::Completed);

        // Phase 1
        Self::ensure_active(cancel)?;
        let window = SyncWindow::around(
            Utc::now(),
            self.config.window_past_days,
            self.config.window_future_days,
        );
        let mut locals: BTreeMap<String, LocalRecord> = self
            .guarded("list_local_records", self.local.list_local_records(window))
            .await??
            .into_iter()
            .map(|record| (record.local_id.clone(), record))
            .collect();
        report.local_count = locals.len();

        // Phase 2
        Self::ensure_active(cancel)?;
        let remote_state = index_by_id(self.remote.fetch_sync_state(family).await?);
        report.remote_count = remote_state.len();

        // Phase 3
        Self::ensure_active(cancel)?;
        let upserts = plan::stage_upserts(&locals, &remote_state);
        report.upserted_to_remote = upserts.len();
        if !locals.is_empty() {
            let batch = SyncBatch {
                upserts,
                local_ids: locals.keys().cloned().collect(),
            };
            self.remote.push_batch(family, &batch).await?;
            report.batch_sent = true;
        }

        // Phase 4
        Self::ensure_active(cancel)?;
        let refreshed = self.remote.fetch_sync_state(family).await?;
        let mut confirmations = Vec::new();

        for record in refreshed
            .iter()
            .filter(|record| record.sync_status == SyncStatus::PendingPush)
        {
            let target = match self.locate(record, &locals).await {
                Ok(target) => target,
                Err(error) => {
                    tracing::warn!(%family, record = %record.local_id, %error, "Skipping pending push");
                    report.skipped_records += 1;
                    continue;
                }
            };
            match self
                .guarded("upsert_local", self.local.upsert_local(target, &record.fields))
                .await
                .and_then(|result| result.map_err(DiffSyncError::from))
            {
                Ok(stored) => {
                    confirmations.push(SyncConfirmation {
                        record_id: record.local_id.clone(),
                        action: ConfirmAction::Pushed,
                        local_id: Some(stored.local_id.clone()),
                        local_modified_at: Some(stored.modified_at),
                    });
                    report.pushed_to_local += 1;
                    locals.insert(stored.local_id.clone(), stored);
                }
                Err(error) => {
                    tracing::warn!(%family, record = %record.local_id, %error, "Skipping pending push");
                    report.skipped_records += 1;
                }
            }
        }

        // Phase 5
        for record in refreshed
            .iter()
            .filter(|record| record.sync_status == SyncStatus::DeletedLocal)
        {
            match self
                .guarded("delete_local", self.local.delete_local(&record.local_id))
                .await
                .and_then(|result| result.map_err(DiffSyncError::from))
            {
                Ok(existed) => {
                    if existed {
                        report.deleted_local += 1;
                    }
                    confirmations.push(SyncConfirmation {
                        record_id: record.local_id.clone(),
                        action: ConfirmAction::Deleted,
                        local_id: None,
                        local_modified_at: None,
                    });
                }
                Err(error) => {
                    tracing::warn!(%family, record = %record.local_id, %error, "Skipping tombstone");
                    report.skipped_records += 1;
                }
            }
        }

        // Phase 6
        if !confirmations.is_empty() {
            self.remote.confirm_sync(family, &confirmations).await?;
            report.confirmations = confirmations.len();
        }

        tracing::info!(
            %family,
            local = report.local_count,
            remote = report.remote_count,
            upserted = report.upserted_to_remote,
            pushed = report.pushed_to_local,
            deleted = report.deleted_local,
            skipped = report.skipped_records,
            "Diff sync pass finished"
        );
        Ok(report)
    }
}

fn index_by_id(records: Vec<RemoteRecord>) -> HashMap<String, RemoteRecord> {
    records
        .into_iter()
        .map(|record| (record.local_id.clone(), record))
        .collect()
}
