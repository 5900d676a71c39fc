//! Key-value blob repository implementation

use crate::error::Result;
use chrono::{DateTime, Utc};
use libsql::{params, Connection};

/// A stored document and the time it was last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Trait for blob storage operations (async)
#[allow(async_fn_in_trait)]
pub trait BlobRepository {
    /// Load the blob stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<StoredBlob>>;

    /// Insert or replace the blob stored under `key`
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Insert or replace several blobs in one transaction
    async fn put_many(&self, entries: &[(&str, &str)]) -> Result<()>;

    /// Remove the blob stored under `key`. Returns whether a row existed.
    async fn remove(&self, key: &str) -> Result<bool>;
}

/// libSQL implementation of `BlobRepository`
pub struct LibSqlBlobRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlBlobRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl BlobRepository for LibSqlBlobRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<StoredBlob>> {
        let mut rows = self
            .conn
            .query("SELECT value, updated_at FROM kv_blobs WHERE key = ?", [key])
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let value: String = row.get(0)?;
        let updated_at_ms: i64 = row.get(1)?;
        let updated_at = DateTime::from_timestamp_millis(updated_at_ms).unwrap_or_default();
        Ok(Some(StoredBlob { value, updated_at }))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        self.conn
            .execute(
                "INSERT OR REPLACE INTO kv_blobs (key, value, updated_at) VALUES (?, ?, ?)",
                params![key, value, now],
            )
            .await?;
        Ok(())
    }

    async fn put_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        for (key, value) in entries {
            if let Err(e) = self
                .conn
                .execute(
                    "INSERT OR REPLACE INTO kv_blobs (key, value, updated_at) VALUES (?, ?, ?)",
                    params![*key, *value, now],
                )
                .await
            {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM kv_blobs WHERE key = ?", [key])
            .await?;
        Ok(rows > 0)
    }
}
