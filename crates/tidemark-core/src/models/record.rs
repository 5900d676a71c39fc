//! Paired local/remote record model for diff-synchronized families

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifiers created on the remote side start with this prefix.
pub const REMOTE_ORIGIN_PREFIX: &str = "remote-";

/// A collection editable on both the local and the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityFamily {
    Events,
    Reminders,
}

impl EntityFamily {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Reminders => "reminders",
        }
    }

    /// Prefix of the family's webhook endpoints.
    #[must_use]
    pub const fn endpoint_prefix(self) -> &'static str {
        match self {
            Self::Events => "calendar",
            Self::Reminders => "reminders",
        }
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes shared by events and reminders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    pub title: String,
    /// Calendar or list name.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Option<u8>,
}

impl RecordFields {
    /// Stable attributes used to re-identify a record whose id went stale.
    #[must_use]
    pub fn matches_heuristically(&self, other: &Self) -> bool {
        self.title == other.title && self.container == other.container && self.starts_at == other.starts_at
    }
}

/// A record as the local store sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub local_id: String,
    pub fields: RecordFields,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The remote holds a change the local store has not received yet.
    PendingPush,
    Synced,
    /// Tombstone: the local copy must be removed.
    DeletedLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Local,
    Remote,
}

/// The remote store's view of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub local_id: String,
    pub fields: RecordFields,
    pub sync_status: SyncStatus,
    pub origin: RecordOrigin,
    /// Remote-side write time.
    pub updated_at: DateTime<Utc>,
    /// Watermark: last local modification time the remote has seen.
    #[serde(default)]
    pub remote_modified_at: Option<DateTime<Utc>>,
}

impl RemoteRecord {
    #[must_use]
    pub fn is_remote_originated(&self) -> bool {
        self.local_id.starts_with(REMOTE_ORIGIN_PREFIX)
    }
}

/// Rolling enumeration window for the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    #[must_use]
    pub fn around(now: DateTime<Utc>, past_days: i64, future_days: i64) -> Self {
        Self {
            start: now - Duration::days(past_days),
            end: now + Duration::days(future_days),
        }
    }
}

/// Phase 3 payload: staged upserts plus the complete local enumeration.
///
/// The remote infers local deletions from ids it knows that are missing
/// from `local_ids`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub upserts: Vec<LocalRecord>,
    pub local_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmAction {
    Pushed,
    Deleted,
}

/// Acknowledges that a pending push or tombstone reached the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfirmation {
    /// Id the remote used for the record.
    pub record_id: String,
    pub action: ConfirmAction,
    /// Id of the local record after the write, if one exists.
    #[serde(default)]
    pub local_id: Option<String>,
    /// New watermark for the record.
    #[serde(default)]
    pub local_modified_at: Option<DateTime<Utc>>,
}
