//! Handling of authoritative-conflict (409) responses.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::models::{Resolution, ResolvedConflict, SyncConflict};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Emitted once per accepted conflict so the UI can show a transient notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictEvent {
    pub description: String,
    pub resolution: Resolution,
    pub was_auto_resolved: bool,
}

/// Interprets conflict bodies and keeps a bounded history of them.
///
/// The remote is the single source of truth: an accepted conflict means the
/// originating intent is already satisfied, so callers drop the request
/// instead of retrying it.
#[derive(Clone)]
pub struct ConflictResolver {
    history: Arc<Mutex<VecDeque<ResolvedConflict>>>,
    limit: usize,
    events: broadcast::Sender<ConflictEvent>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConflictResolver {
    pub fn new(limit: usize) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            history: Arc::new(Mutex::new(VecDeque::new())),
            limit: limit.max(1),
            events,
        }
    }

    /// Returns `false` when `raw` is not a conflict description; the caller
    /// must then fall back to its generic error handling.
    pub async fn handle_conflict_response(&self, raw: &str, context: &str) -> bool {
        self.resolve(raw, context).await.is_some()
    }

    /// Like [`Self::handle_conflict_response`], returning the recorded entry.
    pub async fn resolve(&self, raw: &str, context: &str) -> Option<ResolvedConflict> {
        let conflict = match serde_json::from_str::<SyncConflict>(raw) {
            Ok(conflict) => conflict,
            Err(error) => {
                tracing::error!(context, %error, "Failed to decode conflict response");
                return None;
            }
        };

        let resolved = ResolvedConflict::from_conflict(&conflict, context);
        let event = ConflictEvent {
            description: resolved.description.clone(),
            resolution: resolved.resolution,
            was_auto_resolved: resolved.was_auto_resolved,
        };

        {
            let mut history = self.history.lock().await;
            history.push_back(resolved.clone());
            while history.len() > self.limit {
                history.pop_front();
            }
        }

        tracing::info!(
            context,
            message = %conflict.message,
            resolution = %conflict.resolution,
            "Sync conflict resolved"
        );
        // No receivers is fine
        let _ = self.events.send(event);
        Some(resolved)
    }

    /// Oldest first.
    pub async fn recent_conflicts(&self) -> Vec<ResolvedConflict> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn clear(&self) {
        self.history.lock().await.clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConflictEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn body(message: &str, resolution: &str) -> String {
        format!(
            r#"{{"conflict_type":"duplicate","resolution":"{resolution}","message":"{message}"}}"#
        )
    }

    #[tokio::test]
    async fn accepted_conflict_is_recorded_and_broadcast() {
        let resolver = ConflictResolver::default();
        let mut events = resolver.subscribe();

        assert!(
            resolver
                .handle_conflict_response(&body("Already logged", "server_wins"), "Water: 250ml")
                .await
        );

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            ConflictEvent {
                description: "Water: 250ml: Already logged".to_string(),
                resolution: Resolution::ServerWins,
                was_auto_resolved: true,
            }
        );
        assert_eq!(resolver.recent_conflicts().await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let resolver = ConflictResolver::default();
        assert!(!resolver.handle_conflict_response("<html>", "Food: eggs").await);
        assert!(
            !resolver
                .handle_conflict_response(r#"{"message":"missing fields"}"#, "Food: eggs")
                .await
        );
        assert!(resolver.recent_conflicts().await.is_empty());
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let resolver = ConflictResolver::new(3);
        for index in 0..5 {
            resolver
                .handle_conflict_response(&body(&format!("m{index}"), "merged"), "ctx")
                .await;
        }
        let descriptions: Vec<String> = resolver
            .recent_conflicts()
            .await
            .into_iter()
            .map(|conflict| conflict.description)
            .collect();
        assert_eq!(descriptions, vec!["ctx: m2", "ctx: m3", "ctx: m4"]);

        resolver.clear().await;
        assert!(resolver.recent_conflicts().await.is_empty());
    }

    #[tokio::test]
    async fn needs_review_is_flagged() {
        let resolver = ConflictResolver::default();
        let mut events = resolver.subscribe();
        resolver
            .handle_conflict_response(&body("Edited elsewhere", "needs_review"), "Weight: 80kg")
            .await;
        assert!(!events.recv().await.unwrap().was_auto_resolved);
    }
}
