//! JSON-file local store for events and reminders.
//!
//! Each family lives in `<records-dir>/<family>.json` as an array of records.
//! Writes go to a temporary file first and are renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tidemark_core::diffsync::{LocalAuthorization, LocalStoreError, UpsertTarget};
use tidemark_core::models::{EntityFamily, LocalRecord, RecordFields, SyncWindow};
use tidemark_core::LocalRecordProvider;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct JsonRecordStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonRecordStore {
    pub fn new(records_dir: &Path, family: EntityFamily) -> Self {
        Self {
            path: records_dir.join(format!("{family}.json")),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<LocalRecord>, LocalStoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|error| {
                LocalStoreError::Store(format!("{}: {error}", self.path.display()))
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => Err(LocalStoreError::Store(error.to_string())),
        }
    }

    async fn write_all(&self, records: &[LocalRecord]) -> Result<(), LocalStoreError> {
        let encoded = serde_json::to_string_pretty(records)
            .map_err(|error| LocalStoreError::Store(error.to_string()))?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, encoded)
            .await
            .map_err(|error| LocalStoreError::Store(error.to_string()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|error| LocalStoreError::Store(error.to_string()))
    }
}

fn in_window(record: &LocalRecord, window: SyncWindow) -> bool {
    // Undated entries (e.g. reminders without a due date) are always in scope
    record
        .fields
        .starts_at
        .map_or(true, |start| start >= window.start && start <= window.end)
}

#[async_trait]
impl LocalRecordProvider for JsonRecordStore {
    async fn authorization(&self) -> LocalAuthorization {
        match self.path.parent() {
            Some(dir) if dir.is_dir() => LocalAuthorization::Authorized,
            Some(_) => LocalAuthorization::NotDetermined,
            None => LocalAuthorization::Denied,
        }
    }

    async fn list_local_records(
        &self,
        window: SyncWindow,
    ) -> Result<Vec<LocalRecord>, LocalStoreError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|record| in_window(record, window))
            .collect())
    }

    async fn get_local(&self, local_id: &str) -> Result<Option<LocalRecord>, LocalStoreError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|record| record.local_id == local_id))
    }

    async fn upsert_local(
        &self,
        target: UpsertTarget,
        fields: &RecordFields,
    ) -> Result<LocalRecord, LocalStoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let stored = LocalRecord {
            local_id: match &target {
                UpsertTarget::Update(id) => id.clone(),
                UpsertTarget::Create => format!("local-{}", Uuid::now_v7()),
            },
            fields: fields.clone(),
            modified_at: Utc::now(),
        };

        match records
            .iter_mut()
            .find(|record| record.local_id == stored.local_id)
        {
            Some(existing) => *existing = stored.clone(),
            None if matches!(target, UpsertTarget::Update(_)) => {
                return Err(LocalStoreError::NotFound(stored.local_id));
            }
            None => records.push(stored.clone()),
        }
        self.write_all(&records).await?;
        Ok(stored)
    }

    async fn delete_local(&self, local_id: &str) -> Result<bool, LocalStoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let before = records.len();
        records.retain(|record| record.local_id != local_id);
        if records.len() == before {
            return Ok(false);
        }
        self.write_all(&records).await?;
        Ok(true)
    }
}
