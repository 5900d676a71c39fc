//! Persisted queue and failed-mutation documents.

use crate::models::{FailedMutation, MutationId, QueuedMutation};
use crate::services::BlobStore;
use crate::Result;

pub const QUEUE_KEY: &str = "offline_mutation_queue";
pub const FAILED_KEY: &str = "offline_failed_mutations";

pub(super) const EVICTED_ERROR: &str = "evicted: queue at capacity";

/// Typed access to the two queue blobs. Callers serialize access.
#[derive(Clone)]
pub(super) struct QueueStore {
    blobs: BlobStore,
}

impl QueueStore {
    pub(super) const fn new(blobs: BlobStore) -> Self {
        Self { blobs }
    }

    pub(super) async fn load_pending(&self) -> Result<Vec<QueuedMutation>> {
        self.blobs.load_json(QUEUE_KEY).await
    }

    pub(super) async fn load_failed(&self) -> Result<Vec<FailedMutation>> {
        self.blobs.load_json(FAILED_KEY).await
    }

    pub(super) async fn save_pending(&self, pending: &[QueuedMutation]) -> Result<()> {
        self.blobs.save_json(QUEUE_KEY, pending).await
    }

    pub(super) async fn save_failed(&self, failed: &[FailedMutation]) -> Result<()> {
        self.blobs.save_json(FAILED_KEY, failed).await
    }

    /// Write both documents in one transaction, so an entry moving between
    /// them is never absent from both.
    pub(super) async fn save_both(
        &self,
        pending: &[QueuedMutation],
        failed: &[FailedMutation],
    ) -> Result<()> {
        self.blobs
            .save_json_pair((QUEUE_KEY, pending), (FAILED_KEY, failed))
            .await
    }

    /// Pending items with anything already quarantined filtered out.
    pub(super) async fn load_consistent(&self) -> Result<(Vec<QueuedMutation>, Vec<FailedMutation>)> {
        let failed = self.load_failed().await?;
        let mut pending = self.load_pending().await?;
        let before = pending.len();
        pending.retain(|item| !failed.iter().any(|entry| entry.id() == item.id));
        if pending.len() != before {
            tracing::warn!(
                duplicates = before - pending.len(),
                "Dropped queue entries already present in the failed store"
            );
        }
        Ok((pending, failed))
    }
}

/// Index of the entry to evict when the queue is full: the oldest entry of
/// the lowest-priority tier present.
pub(super) fn eviction_candidate(pending: &[QueuedMutation]) -> Option<usize> {
    let lowest = pending.iter().map(|item| item.priority.rank()).max()?;
    pending
        .iter()
        .enumerate()
        .filter(|(_, item)| item.priority.rank() == lowest)
        .min_by_key(|(index, item)| (item.created_at, *index))
        .map(|(index, _)| index)
}

/// Stable priority order: high, normal, low; insertion order within a tier.
pub(super) fn drain_order(mut pending: Vec<QueuedMutation>) -> Vec<QueuedMutation> {
    pending.sort_by_key(|item| item.priority.rank());
    pending
}

pub(super) fn position(pending: &[QueuedMutation], id: MutationId) -> Option<usize> {
    pending.iter().position(|item| item.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MutationKind, Priority};
    use pretty_assertions::assert_eq;

    fn item(amount_ml: u32, priority: Priority) -> QueuedMutation {
        QueuedMutation::new(MutationKind::Water { amount_ml }, priority)
    }

    #[test]
    fn drain_order_is_stable_within_tier() {
        let items = vec![
            item(1, Priority::Low),
            item(2, Priority::Normal),
            item(3, Priority::High),
            item(4, Priority::Normal),
            item(5, Priority::High),
        ];
        let ordered: Vec<String> = drain_order(items)
            .iter()
            .map(|item| item.kind.describe())
            .collect();
        assert_eq!(
            ordered,
            vec!["Water: 3ml", "Water: 5ml", "Water: 2ml", "Water: 4ml", "Water: 1ml"]
        );
    }

    #[test]
    fn eviction_prefers_oldest_of_lowest_tier() {
        let items = vec![
            item(1, Priority::High),
            item(2, Priority::Normal),
            item(3, Priority::Normal),
        ];
        assert_eq!(eviction_candidate(&items), Some(1));
        assert_eq!(eviction_candidate(&[]), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_consistent_repairs_duplicates() {
        let store = QueueStore::new(BlobStore::open_in_memory().await.unwrap());
        let duplicated = item(250, Priority::Normal);
        let kept = item(500, Priority::Normal);
        store
            .save_both(
                &[duplicated.clone(), kept.clone()],
                &[FailedMutation::new(duplicated, "boom")],
            )
            .await
            .unwrap();

        let (pending, failed) = store.load_consistent().await.unwrap();
        assert_eq!(pending, vec![kept]);
        assert_eq!(failed.len(), 1);
    }
}
