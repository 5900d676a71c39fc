//! Shared blob store service used by the queue and pull-domain caches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::{BlobRepository, Database, LibSqlBlobRepository, StoredBlob};
use crate::Result;

/// Thread-safe service for JSON documents stored in `kv_blobs`.
#[derive(Clone)]
pub struct BlobStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl BlobStore {
    /// Open a blob store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::debug!(path = %db_path.display(), "Opened blob store");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory blob store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Raw blob with its write time.
    pub async fn load_blob(&self, key: &str) -> Result<Option<StoredBlob>> {
        let db = self.db.lock().await;
        let repo = LibSqlBlobRepository::new(db.connection());
        repo.get(key).await
    }

    /// Decode a JSON document. Missing or undecodable documents read as `T::default()`.
    pub async fn load_json<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let Some(blob) = self.load_blob(key).await? else {
            return Ok(T::default());
        };
        match serde_json::from_str(&blob.value) {
            Ok(value) => Ok(value),
            Err(error) => {
                tracing::error!(key, %error, "Discarding undecodable blob");
                Ok(T::default())
            }
        }
    }

    /// Encode and store a JSON document.
    pub async fn save_json<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_string(value)?;
        let db = self.db.lock().await;
        let repo = LibSqlBlobRepository::new(db.connection());
        repo.put(key, &encoded).await
    }

    /// Encode and store two JSON documents in a single transaction.
    pub async fn save_json_pair<A, B>(&self, first: (&str, &A), second: (&str, &B)) -> Result<()>
    where
        A: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let first_encoded = serde_json::to_string(first.1)?;
        let second_encoded = serde_json::to_string(second.1)?;
        let db = self.db.lock().await;
        let repo = LibSqlBlobRepository::new(db.connection());
        repo.put_many(&[(first.0, &first_encoded), (second.0, &second_encoded)])
            .await
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlBlobRepository::new(db.connection());
        repo.remove(key).await
    }
}
