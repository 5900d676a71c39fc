//! In-memory stand-ins for the local store and the sync-state endpoints.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tidemark_core::diffsync::{LocalAuthorization, LocalStoreError, UpsertTarget};
use tidemark_core::models::{
    ConfirmAction, EntityFamily, LocalRecord, RecordFields, RecordOrigin, RemoteRecord, SyncBatch,
    SyncConfirmation, SyncStatus, SyncWindow,
};
use tidemark_core::remote::{RemoteResult, SyncStateRemote};
use tidemark_core::LocalRecordProvider;

/// Local store with a monotonic clock so every write gets a distinct time.
pub struct MemoryLocalStore {
    records: Mutex<BTreeMap<String, LocalRecord>>,
    clock: Mutex<DateTime<Utc>>,
    next_id: Mutex<u32>,
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            clock: Mutex::new(Utc::now()),
            next_id: Mutex::new(0),
        }
    }
}

impl MemoryLocalStore {
    fn tick(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock().unwrap();
        *clock = (*clock + Duration::milliseconds(1)).max(Utc::now());
        *clock
    }

    /// Simulate a user edit.
    pub fn edit(&self, id: &str, fields: RecordFields) -> LocalRecord {
        let record = LocalRecord {
            local_id: id.to_string(),
            fields,
            modified_at: self.tick(),
        };
        self.records
            .lock()
            .unwrap()
            .insert(id.to_string(), record.clone());
        record
    }

    pub fn remove(&self, id: &str) {
        self.records.lock().unwrap().remove(id);
    }

    pub fn records(&self) -> BTreeMap<String, LocalRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalRecordProvider for MemoryLocalStore {
    async fn authorization(&self) -> LocalAuthorization {
        LocalAuthorization::Authorized
    }

    async fn list_local_records(
        &self,
        _window: SyncWindow,
    ) -> Result<Vec<LocalRecord>, LocalStoreError> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn get_local(&self, local_id: &str) -> Result<Option<LocalRecord>, LocalStoreError> {
        Ok(self.records.lock().unwrap().get(local_id).cloned())
    }

    async fn upsert_local(
        &self,
        target: UpsertTarget,
        fields: &RecordFields,
    ) -> Result<LocalRecord, LocalStoreError> {
        let id = match target {
            UpsertTarget::Update(id) => id,
            UpsertTarget::Create => {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                format!("device-{next}")
            }
        };
        Ok(self.edit(&id, fields.clone()))
    }

    async fn delete_local(&self, local_id: &str) -> Result<bool, LocalStoreError> {
        Ok(self.records.lock().unwrap().remove(local_id).is_some())
    }
}

/// Sync-state endpoints with watermark bookkeeping.
///
/// Upserts land as `synced` with the watermark set to the local modification
/// time, synced ids missing from a batch's enumeration are dropped, and
/// confirmations re-key records to the id the device reported.
#[derive(Default)]
pub struct WatermarkRemote {
    records: Mutex<BTreeMap<String, RemoteRecord>>,
    pub batches: Mutex<Vec<SyncBatch>>,
    pub confirmations: Mutex<Vec<SyncConfirmation>>,
}

impl WatermarkRemote {
    /// Simulate an edit made on another client.
    pub fn create_remote(&self, id: &str, fields: RecordFields) {
        self.records.lock().unwrap().insert(
            id.to_string(),
            RemoteRecord {
                local_id: id.to_string(),
                fields,
                sync_status: SyncStatus::PendingPush,
                origin: RecordOrigin::Remote,
                updated_at: Utc::now(),
                remote_modified_at: None,
            },
        );
    }

    pub fn tombstone(&self, id: &str) {
        if let Some(record) = self.records.lock().unwrap().get_mut(id) {
            record.sync_status = SyncStatus::DeletedLocal;
        }
    }

    pub fn records(&self) -> BTreeMap<String, RemoteRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn last_batch(&self) -> Option<SyncBatch> {
        self.batches.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SyncStateRemote for WatermarkRemote {
    async fn fetch_sync_state(&self, _family: EntityFamily) -> RemoteResult<Vec<RemoteRecord>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn push_batch(&self, _family: EntityFamily, batch: &SyncBatch) -> RemoteResult<()> {
        self.batches.lock().unwrap().push(batch.clone());
        let mut records = self.records.lock().unwrap();
        for upsert in &batch.upserts {
            records.insert(
                upsert.local_id.clone(),
                RemoteRecord {
                    local_id: upsert.local_id.clone(),
                    fields: upsert.fields.clone(),
                    sync_status: SyncStatus::Synced,
                    origin: RecordOrigin::Local,
                    updated_at: Utc::now(),
                    remote_modified_at: Some(upsert.modified_at),
                },
            );
        }
        records.retain(|id, record| {
            record.sync_status != SyncStatus::Synced || batch.local_ids.contains(id)
        });
        Ok(())
    }

    async fn confirm_sync(
        &self,
        _family: EntityFamily,
        confirmations: &[SyncConfirmation],
    ) -> RemoteResult<()> {
        self.confirmations
            .lock()
            .unwrap()
            .extend_from_slice(confirmations);
        let mut records = self.records.lock().unwrap();
        for confirmation in confirmations {
            let Some(mut record) = records.remove(&confirmation.record_id) else {
                continue;
            };
            if confirmation.action == ConfirmAction::Pushed {
                if let Some(local_id) = &confirmation.local_id {
                    record.local_id.clone_from(local_id);
                }
                record.sync_status = SyncStatus::Synced;
                record.remote_modified_at = confirmation.local_modified_at;
                records.insert(record.local_id.clone(), record);
            }
        }
        Ok(())
    }
}

pub fn event(title: &str) -> RecordFields {
    RecordFields {
        title: title.to_string(),
        container: Some("Personal".to_string()),
        starts_at: Some(Utc::now() + Duration::days(1)),
        ..RecordFields::default()
    }
}
