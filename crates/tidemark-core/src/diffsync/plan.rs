//! Pure decisions behind phases 3 and 4.

use std::collections::{BTreeMap, HashMap};

use crate::models::{LocalRecord, RemoteRecord, SyncStatus};

use super::UpsertTarget;

/// Phase 3 decision for one local record.
///
/// Timestamps come from two different clocks; no skew correction is applied.
pub(super) fn needs_upsert(local: &LocalRecord, remote: Option<&RemoteRecord>) -> bool {
    let Some(remote) = remote else {
        return true;
    };
    match remote.sync_status {
        // Last writer wins; otherwise phase 4 applies the remote version
        SyncStatus::PendingPush => local.modified_at > remote.updated_at,
        // Equal watermark is our own echo
        SyncStatus::Synced => remote
            .remote_modified_at
            .map_or(true, |watermark| local.modified_at > watermark),
        SyncStatus::DeletedLocal => false,
    }
}

pub(super) fn stage_upserts(
    locals: &BTreeMap<String, LocalRecord>,
    remote: &HashMap<String, RemoteRecord>,
) -> Vec<LocalRecord> {
    locals
        .values()
        .filter(|local| needs_upsert(local, remote.get(&local.local_id)))
        .cloned()
        .collect()
}

/// Whether a pending record carries a local identifier the window missed.
pub(super) fn needs_store_lookup(
    record: &RemoteRecord,
    locals: &BTreeMap<String, LocalRecord>,
) -> bool {
    !record.is_remote_originated() && !locals.contains_key(&record.local_id)
}

/// Where a pending remote record lands in the local store.
pub(super) fn resolve_target(
    record: &RemoteRecord,
    locals: &BTreeMap<String, LocalRecord>,
) -> UpsertTarget {
    if record.is_remote_originated() {
        return UpsertTarget::Create;
    }
    if locals.contains_key(&record.local_id) {
        return UpsertTarget::Update(record.local_id.clone());
    }
    locals
        .values()
        .find(|local| local.fields.matches_heuristically(&record.fields))
        .map_or(UpsertTarget::Create, |local| {
            UpsertTarget::Update(local.local_id.clone())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordFields, RecordOrigin, REMOTE_ORIGIN_PREFIX};
    use chrono::{DateTime, Duration, Utc};
    use pretty_assertions::assert_eq;

    fn fields(title: &str, start: DateTime<Utc>) -> RecordFields {
        RecordFields {
            title: title.to_string(),
            container: Some("Personal".to_string()),
            starts_at: Some(start),
            ..RecordFields::default()
        }
    }

    fn local(id: &str, modified_at: DateTime<Utc>) -> LocalRecord {
        LocalRecord {
            local_id: id.to_string(),
            fields: fields(id, modified_at),
            modified_at,
        }
    }

    fn remote(
        id: &str,
        status: SyncStatus,
        updated_at: DateTime<Utc>,
        watermark: Option<DateTime<Utc>>,
    ) -> RemoteRecord {
        RemoteRecord {
            local_id: id.to_string(),
            fields: RecordFields::default(),
            sync_status: status,
            origin: RecordOrigin::Local,
            updated_at,
            remote_modified_at: watermark,
        }
    }

    #[test]
    fn unknown_records_are_staged() {
        let now = Utc::now();
        assert!(needs_upsert(&local("a", now), None));
    }

    #[test]
    fn synced_records_use_the_watermark() {
        let now = Utc::now();
        let record = local("a", now);
        let echo = remote("a", SyncStatus::Synced, now, Some(now));
        assert!(!needs_upsert(&record, Some(&echo)));

        let stale = remote("a", SyncStatus::Synced, now, Some(now - Duration::seconds(1)));
        assert!(needs_upsert(&record, Some(&stale)));

        let no_watermark = remote("a", SyncStatus::Synced, now, None);
        assert!(needs_upsert(&record, Some(&no_watermark)));
    }

    #[test]
    fn pending_push_is_last_writer_wins() {
        let now = Utc::now();
        let record = local("a", now);
        let older_remote = remote("a", SyncStatus::PendingPush, now - Duration::minutes(5), None);
        assert!(needs_upsert(&record, Some(&older_remote)));

        let newer_remote = remote("a", SyncStatus::PendingPush, now + Duration::minutes(5), None);
        assert!(!needs_upsert(&record, Some(&newer_remote)));

        let same_time = remote("a", SyncStatus::PendingPush, now, None);
        assert!(!needs_upsert(&record, Some(&same_time)));
    }

    #[test]
    fn tombstones_are_left_to_phase_five() {
        let now = Utc::now();
        let tombstone = remote("a", SyncStatus::DeletedLocal, now, Some(now));
        assert!(!needs_upsert(&local("a", now + Duration::hours(1)), Some(&tombstone)));
    }

    #[test]
    fn stage_upserts_skips_echoes() {
        let now = Utc::now();
        let locals: BTreeMap<String, LocalRecord> = ["b", "a", "c"]
            .into_iter()
            .map(|id| (id.to_string(), local(id, now)))
            .collect();
        let mut remote_state = HashMap::new();
        remote_state.insert("b".to_string(), remote("b", SyncStatus::Synced, now, Some(now)));

        let staged: Vec<String> = stage_upserts(&locals, &remote_state)
            .into_iter()
            .map(|record| record.local_id)
            .collect();
        assert_eq!(staged, vec!["a", "c"]);
    }

    #[test]
    fn resolve_target_prefers_id_then_heuristic() {
        let now = Utc::now();
        let mut locals = BTreeMap::new();
        locals.insert("evt-1".to_string(), local("evt-1", now));

        let mut by_id = remote("evt-1", SyncStatus::PendingPush, now, None);
        by_id.fields = fields("Different", now);
        assert_eq!(
            resolve_target(&by_id, &locals),
            UpsertTarget::Update("evt-1".to_string())
        );

        let mut stale_id = remote("evt-gone", SyncStatus::PendingPush, now, None);
        stale_id.fields = fields("evt-1", now);
        assert_eq!(
            resolve_target(&stale_id, &locals),
            UpsertTarget::Update("evt-1".to_string())
        );

        let mut unmatched = remote("evt-gone", SyncStatus::PendingPush, now, None);
        unmatched.fields = fields("Lunch", now);
        assert_eq!(resolve_target(&unmatched, &locals), UpsertTarget::Create);

        let mut remote_origin = remote(
            &format!("{REMOTE_ORIGIN_PREFIX}9"),
            SyncStatus::PendingPush,
            now,
            None,
        );
        remote_origin.fields = fields("evt-1", now);
        assert_eq!(resolve_target(&remote_origin, &locals), UpsertTarget::Create);
    }

    #[test]
    fn only_unseen_local_ids_need_a_store_lookup() {
        let now = Utc::now();
        let mut locals = BTreeMap::new();
        locals.insert("evt-1".to_string(), local("evt-1", now));

        let seen = remote("evt-1", SyncStatus::PendingPush, now, None);
        assert!(!needs_store_lookup(&seen, &locals));

        let moved = remote("evt-far", SyncStatus::PendingPush, now, None);
        assert!(needs_store_lookup(&moved, &locals));

        let remote_origin = remote(
            &format!("{REMOTE_ORIGIN_PREFIX}4"),
            SyncStatus::PendingPush,
            now,
            None,
        );
        assert!(!needs_store_lookup(&remote_origin, &locals));
    }
}
