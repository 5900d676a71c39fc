//! Sync conflict model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of disagreement the remote detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Duplicate,
    VersionMismatch,
    StaleUpdate,
}

/// How the remote settled the conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    ServerWins,
    ClientWins,
    Merged,
    NeedsReview,
}

impl Resolution {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServerWins => "server_wins",
            Self::ClientWins => "client_wins",
            Self::Merged => "merged",
            Self::NeedsReview => "needs_review",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured body of a 409 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub conflict_type: ConflictType,
    pub resolution: Resolution,
    #[serde(default)]
    pub server_version: Option<String>,
    #[serde(default)]
    pub client_version: Option<String>,
    pub message: String,
}

/// History entry kept for UI display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConflict {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    /// `"{context}: {message}"`
    pub description: String,
    pub resolution: Resolution,
    pub was_auto_resolved: bool,
}

impl ResolvedConflict {
    #[must_use]
    pub fn from_conflict(conflict: &SyncConflict, context: &str) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            timestamp: Utc::now(),
            description: format!("{context}: {}", conflict.message),
            resolution: conflict.resolution,
            was_auto_resolved: conflict.resolution != Resolution::NeedsReview,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_conflict_decodes_snake_case_body() {
        let raw = r#"{
            "conflict_type": "duplicate",
            "server_version": "250ml at 09:00",
            "client_version": null,
            "resolution": "server_wins",
            "message": "Already logged"
        }"#;
        let conflict: SyncConflict = serde_json::from_str(raw).unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::Duplicate);
        assert_eq!(conflict.resolution, Resolution::ServerWins);
        assert_eq!(conflict.server_version.as_deref(), Some("250ml at 09:00"));
        assert_eq!(conflict.client_version, None);
    }

    #[test]
    fn test_needs_review_is_not_auto_resolved() {
        let conflict = SyncConflict {
            conflict_type: ConflictType::StaleUpdate,
            resolution: Resolution::NeedsReview,
            server_version: None,
            client_version: None,
            message: "Edited elsewhere".to_string(),
        };
        let resolved = ResolvedConflict::from_conflict(&conflict, "Weight: 80kg");
        assert!(!resolved.was_auto_resolved);
        assert_eq!(resolved.description, "Weight: 80kg: Edited elsewhere");
    }
}
