//! Sync domain state model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One independently schedulable data family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDomain {
    Dashboard,
    Finance,
    Calendar,
    Reminders,
    ActivityFeed,
    Documents,
}

impl SyncDomain {
    pub const ALL: [Self; 6] = [
        Self::Dashboard,
        Self::Finance,
        Self::Calendar,
        Self::Reminders,
        Self::ActivityFeed,
        Self::Documents,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Finance => "finance",
            Self::Calendar => "calendar",
            Self::Reminders => "reminders",
            Self::ActivityFeed => "activity_feed",
            Self::Documents => "documents",
        }
    }
}

impl fmt::Display for SyncDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|domain| domain.as_str() == normalized)
            .ok_or_else(|| format!("unknown sync domain: {s}"))
    }
}

/// Where a domain's latest data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Network,
    Cache,
    LocalStore,
}

/// Per-domain state machine position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum DomainPhase {
    #[default]
    Idle,
    Syncing,
    Succeeded {
        at: DateTime<Utc>,
    },
    Failed {
        reason: String,
    },
}

/// Snapshot of one domain as seen by observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainState {
    pub phase: DomainPhase,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_item_count: Option<usize>,
    pub last_source: Option<DataSource>,
    /// Free-form status line, e.g. a cache age or feed summary.
    pub detail: Option<String>,
}

impl DomainState {
    #[must_use]
    pub const fn is_syncing(&self) -> bool {
        matches!(self.phase, DomainPhase::Syncing)
    }

    pub fn begin(&mut self) {
        self.phase = DomainPhase::Syncing;
    }

    pub fn succeed(&mut self, at: DateTime<Utc>, report: &DomainReport) {
        self.phase = DomainPhase::Succeeded { at };
        self.last_success_at = Some(at);
        self.last_error = None;
        self.last_item_count = Some(report.item_count);
        self.last_source = Some(report.source);
        self.detail.clone_from(&report.detail);
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.last_error = Some(reason.clone());
        self.phase = DomainPhase::Failed { reason };
    }

    /// Cancellation is not an error: back to idle, history untouched.
    pub fn cancel(&mut self) {
        self.phase = DomainPhase::Idle;
    }
}

/// What a successful domain run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainReport {
    pub item_count: usize,
    pub source: DataSource,
    pub detail: Option<String>,
}

impl DomainReport {
    #[must_use]
    pub const fn network(item_count: usize) -> Self {
        Self {
            item_count,
            source: DataSource::Network,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
