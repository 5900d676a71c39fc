//! Concrete domain runners.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{DomainError, DomainSync, SyncPhase};
use crate::diffsync::{DiffSyncError, DiffSynchronizer, PassOutcome};
use crate::models::{DataSource, DomainReport, SyncDomain};
use crate::remote::{CredentialProvider, PullSource};
use crate::services::BlobStore;
use crate::util::format_cache_age;

fn require_key(credentials: &dyn CredentialProvider) -> Result<(), DomainError> {
    if credentials.api_key().is_some() {
        Ok(())
    } else {
        Err(DomainError::Skipped("no API key configured".to_string()))
    }
}

/// Push domain backed by a [`DiffSynchronizer`].
pub struct DiffSyncDomain {
    domain: SyncDomain,
    synchronizer: DiffSynchronizer,
    credentials: Arc<dyn CredentialProvider>,
}

impl DiffSyncDomain {
    pub fn new(
        domain: SyncDomain,
        synchronizer: DiffSynchronizer,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            domain,
            synchronizer,
            credentials,
        }
    }
}

#[async_trait]
impl DomainSync for DiffSyncDomain {
    fn domain(&self) -> SyncDomain {
        self.domain
    }

    fn phase(&self) -> SyncPhase {
        SyncPhase::Push
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<DomainReport, DomainError> {
        require_key(self.credentials.as_ref())?;

        let report = match self.synchronizer.run(cancel).await {
            Ok(report) => report,
            Err(DiffSyncError::Cancelled) => return Err(DomainError::Cancelled),
            Err(error) => return Err(error.into()),
        };
        if report.outcome == PassOutcome::NotAuthorized {
            return Err(DomainError::NotAuthorized(self.synchronizer.family()));
        }

        let detail = format!(
            "{} sent, {} received, {} removed",
            report.upserted_to_remote, report.pushed_to_local, report.deleted_local
        );
        Ok(DomainReport {
            item_count: report.local_count,
            source: DataSource::LocalStore,
            detail: Some(detail),
        })
    }
}

/// Pull domain that caches the last good payload.
///
/// When the fetch fails and a cached payload exists, the run still succeeds
/// with [`DataSource::Cache`] and the cache age as detail.
pub struct RemotePullDomain {
    domain: SyncDomain,
    path: String,
    source: Arc<dyn PullSource>,
    blobs: BlobStore,
    credentials: Arc<dyn CredentialProvider>,
}

impl RemotePullDomain {
    pub fn new(
        domain: SyncDomain,
        path: impl Into<String>,
        source: Arc<dyn PullSource>,
        blobs: BlobStore,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            domain,
            path: path.into(),
            source,
            blobs,
            credentials,
        }
    }

    fn cache_key(&self) -> String {
        format!("pull_cache:{}", self.domain)
    }

    /// Last cached payload and when it was stored.
    pub async fn cached_payload(&self) -> crate::Result<Option<(DateTime<Utc>, Value)>> {
        let Some(blob) = self.blobs.load_blob(&self.cache_key()).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&blob.value) {
            Ok(payload) => Ok(Some((blob.updated_at, payload))),
            Err(error) => {
                tracing::error!(domain = %self.domain, %error, "Discarding undecodable cache");
                Ok(None)
            }
        }
    }

    pub async fn cache_age(&self) -> Option<std::time::Duration> {
        let (stored_at, _) = self.cached_payload().await.ok().flatten()?;
        (Utc::now() - stored_at).to_std().ok()
    }

    fn cache_report(stored_at: DateTime<Utc>, payload: &Value) -> DomainReport {
        let age = (Utc::now() - stored_at).to_std().unwrap_or_default();
        DomainReport {
            item_count: item_count(payload),
            source: DataSource::Cache,
            detail: Some(format_cache_age(age)),
        }
    }
}

#[async_trait]
impl DomainSync for RemotePullDomain {
    fn domain(&self) -> SyncDomain {
        self.domain
    }

    fn phase(&self) -> SyncPhase {
        SyncPhase::Pull
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<DomainReport, DomainError> {
        require_key(self.credentials.as_ref())?;

        let fetched = tokio::select! {
            () = cancel.cancelled() => return Err(DomainError::Cancelled),
            result = self.source.fetch(&self.path) => result,
        };

        match fetched {
            Ok(payload) => {
                self.blobs.save_json(&self.cache_key(), &payload).await?;
                Ok(DomainReport::network(item_count(&payload)))
            }
            Err(error) => match self.cached_payload().await? {
                Some((stored_at, payload)) => {
                    tracing::warn!(domain = %self.domain, %error, "Serving cached payload");
                    Ok(Self::cache_report(stored_at, &payload))
                }
                None => Err(error.into()),
            },
        }
    }

    async fn cached_report(&self) -> Option<(DateTime<Utc>, DomainReport)> {
        let (stored_at, payload) = self.cached_payload().await.ok().flatten()?;
        Some((stored_at, Self::cache_report(stored_at, &payload)))
    }
}

/// Arrays count their elements, objects with an `items` array count those,
/// anything else counts as one.
fn item_count(payload: &Value) -> usize {
    match payload {
        Value::Array(items) => items.len(),
        Value::Object(map) => map
            .get("items")
            .and_then(Value::as_array)
            .map_or(1, Vec::len),
        Value::Null => 0,
        _ => 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedHealth {
    Healthy,
    Stale,
    Critical,
}

impl FeedHealth {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Stale => "stale",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedStatus {
    pub feed: String,
    pub status: FeedHealth,
    #[serde(default)]
    pub last_sync: Option<String>,
    #[serde(default)]
    pub hours_since_sync: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FeedStatusPayload {
    #[serde(default)]
    feed_status: Vec<FeedStatus>,
}

/// Pull domain that checks ingestion feed health.
pub struct FeedStatusDomain {
    path: String,
    expected_feeds: BTreeSet<String>,
    source: Arc<dyn PullSource>,
    credentials: Arc<dyn CredentialProvider>,
}

impl FeedStatusDomain {
    pub fn new(
        path: impl Into<String>,
        expected_feeds: impl IntoIterator<Item = impl Into<String>>,
        source: Arc<dyn PullSource>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            path: path.into(),
            expected_feeds: expected_feeds.into_iter().map(Into::into).collect(),
            source,
            credentials,
        }
    }
}

/// Fails on any stale, critical or missing expected feed.
pub fn evaluate_feeds(
    statuses: &[FeedStatus],
    expected: &BTreeSet<String>,
) -> Result<DomainReport, DomainError> {
    let mut problems: Vec<String> = statuses
        .iter()
        .filter(|status| status.status != FeedHealth::Healthy)
        .map(|status| match status.hours_since_sync {
            Some(hours) => format!("{} {} ({hours:.1}h)", status.feed, status.status.as_str()),
            None => format!("{} {}", status.feed, status.status.as_str()),
        })
        .collect();
    problems.extend(
        expected
            .iter()
            .filter(|feed| !statuses.iter().any(|status| &status.feed == *feed))
            .map(|feed| format!("{feed} missing")),
    );

    if !problems.is_empty() {
        return Err(DomainError::Unhealthy(problems.join(", ")));
    }
    Ok(DomainReport::network(statuses.len())
        .with_detail(format!("{} feeds healthy", statuses.len())))
}

#[async_trait]
impl DomainSync for FeedStatusDomain {
    fn domain(&self) -> SyncDomain {
        SyncDomain::ActivityFeed
    }

    fn phase(&self) -> SyncPhase {
        SyncPhase::Pull
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<DomainReport, DomainError> {
        require_key(self.credentials.as_ref())?;

        let payload = tokio::select! {
            () = cancel.cancelled() => return Err(DomainError::Cancelled),
            result = self.source.fetch(&self.path) => result?,
        };
        let parsed: FeedStatusPayload = serde_json::from_value(payload)
            .map_err(|error| DomainError::Unhealthy(format!("unreadable feed status: {error}")))?;
        evaluate_feeds(&parsed.feed_status, &self.expected_feeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, RemoteResult, StaticCredentials};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedSource(Mutex<Vec<RemoteResult<Value>>>);

    #[async_trait]
    impl PullSource for CannedSource {
        async fn fetch(&self, _path: &str) -> RemoteResult<Value> {
            self.0.lock().unwrap().remove(0)
        }
    }

    fn key() -> Arc<dyn CredentialProvider> {
        Arc::new(StaticCredentials::new(Some("key".to_string())))
    }

    #[test]
    fn item_count_follows_payload_shape() {
        assert_eq!(item_count(&json!([1, 2, 3])), 3);
        assert_eq!(item_count(&json!({"items": [1, 2]})), 2);
        assert_eq!(item_count(&json!({"total": 4})), 1);
        assert_eq!(item_count(&Value::Null), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_falls_back_to_cache() {
        let blobs = BlobStore::open_in_memory().await.unwrap();
        let source = Arc::new(CannedSource(Mutex::new(vec![
            Ok(json!({"items": [1, 2]})),
            Err(RemoteError::Offline),
        ])));
        let domain = RemotePullDomain::new(
            SyncDomain::Dashboard,
            "/webhook/tidemark-dashboard",
            source,
            blobs,
            key(),
        );
        let cancel = CancellationToken::new();

        let fresh = domain.run(&cancel).await.unwrap();
        assert_eq!(fresh, DomainReport::network(2));

        let cached = domain.run(&cancel).await.unwrap();
        assert_eq!(cached.source, DataSource::Cache);
        assert_eq!(cached.item_count, 2);
        assert_eq!(cached.detail.as_deref(), Some("< 1 min old"));
        assert!(domain.cache_age().await.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_without_cache_fails() {
        let blobs = BlobStore::open_in_memory().await.unwrap();
        let source = Arc::new(CannedSource(Mutex::new(vec![Err(RemoteError::Timeout)])));
        let domain = RemotePullDomain::new(SyncDomain::Finance, "/f", source, blobs, key());

        let error = domain.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, DomainError::Remote(RemoteError::Timeout)));
        assert!(domain.cached_report().await.is_none());
    }

    #[tokio::test]
    async fn missing_key_skips_pull() {
        let source = Arc::new(CannedSource(Mutex::new(Vec::new())));
        let domain = FeedStatusDomain::new(
            "/feeds",
            ["bank"],
            source,
            Arc::new(StaticCredentials::new(None)),
        );
        let error = domain.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, DomainError::Skipped(_)));
    }

    #[test]
    fn feed_health_reports_problems() {
        let statuses = vec![
            FeedStatus {
                feed: "bank".to_string(),
                status: FeedHealth::Healthy,
                last_sync: None,
                hours_since_sync: Some(1.0),
            },
            FeedStatus {
                feed: "health".to_string(),
                status: FeedHealth::Stale,
                last_sync: None,
                hours_since_sync: Some(30.0),
            },
        ];
        let expected: BTreeSet<String> = ["bank", "health", "calendar"]
            .into_iter()
            .map(String::from)
            .collect();

        let error = evaluate_feeds(&statuses, &expected).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Feed problems: health stale (30.0h), calendar missing"
        );

        let report = evaluate_feeds(&statuses[..1], &BTreeSet::new()).unwrap();
        assert_eq!(report.detail.as_deref(), Some("1 feeds healthy"));
    }

    #[tokio::test]
    async fn feed_domain_parses_payload() {
        let source = Arc::new(CannedSource(Mutex::new(vec![Ok(json!({
            "feed_status": [
                {"feed": "bank", "status": "critical", "last_sync": "2026-01-01", "hours_since_sync": 72.0}
            ]
        }))])));
        let domain = FeedStatusDomain::new("/feeds", ["bank"], source, key());
        let error = domain.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, DomainError::Unhealthy(_)));
    }
}
