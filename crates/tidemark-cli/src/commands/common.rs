use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tidemark_core::models::{
    DomainPhase, DomainState, EntityFamily, FailedMutation, QueuedMutation, SyncDomain,
};
use tidemark_core::orchestrator::{
    DiffSyncDomain, DomainSync, FeedStatusDomain, RemotePullDomain, StateMap,
};
use tidemark_core::queue::SubmitOutcome;
use tidemark_core::remote::{
    CredentialProvider, HttpRemote, MutationTransport, PullSource, SyncStateRemote,
};
use tidemark_core::{
    BlobStore, ClientConfig, ConflictResolver, DiffSynchronizer, LocalRecordProvider,
    RateLimiter, RetryQueue, SyncOrchestrator,
};

use crate::auth::{CliCredentials, KeyStore};
use crate::error::CliError;
use crate::record_store::JsonRecordStore;

pub const EXPECTED_FEEDS: [&str; 3] = ["health", "calendar", "finance"];

/// Everything a command needs to talk to the server and the local state.
pub struct Client {
    pub config: ClientConfig,
    pub credentials: Arc<CliCredentials>,
    pub blobs: BlobStore,
    pub remote: Arc<HttpRemote>,
    pub queue: RetryQueue,
}

pub async fn open_client(db_path: &Path) -> Result<Client, CliError> {
    open_client_with(ClientConfig::from_env()?, KeyStore::default(), db_path).await
}

pub async fn open_client_with(
    config: ClientConfig,
    key_store: KeyStore,
    db_path: &Path,
) -> Result<Client, CliError> {
    let credentials = Arc::new(CliCredentials::new(config.api_key.clone(), key_store));
    let blobs = BlobStore::open_path(db_path.to_path_buf()).await?;
    let remote = Arc::new(HttpRemote::from_config(
        &config,
        Arc::clone(&credentials) as Arc<dyn CredentialProvider>,
    )?);
    let queue = RetryQueue::new(
        blobs.clone(),
        Arc::clone(&remote) as Arc<dyn MutationTransport>,
        RateLimiter::new(config.rate_limit.clone()),
        ConflictResolver::new(config.conflict_history_limit),
        Arc::clone(&credentials) as Arc<dyn CredentialProvider>,
        config.queue,
    );

    Ok(Client {
        config,
        credentials,
        blobs,
        remote,
        queue,
    })
}

pub fn build_orchestrator(
    client: &Client,
    records_dir: &Path,
) -> Result<Arc<SyncOrchestrator>, CliError> {
    std::fs::create_dir_all(records_dir)?;

    let credentials = Arc::clone(&client.credentials) as Arc<dyn CredentialProvider>;
    let sync_remote = Arc::clone(&client.remote) as Arc<dyn SyncStateRemote>;
    let pull_source = Arc::clone(&client.remote) as Arc<dyn PullSource>;

    let diff_domain = |domain: SyncDomain, family: EntityFamily| -> Arc<dyn DomainSync> {
        let local = Arc::new(JsonRecordStore::new(records_dir, family));
        Arc::new(DiffSyncDomain::new(
            domain,
            DiffSynchronizer::new(
                family,
                local as Arc<dyn LocalRecordProvider>,
                Arc::clone(&sync_remote),
                client.config.diff_sync,
            ),
            Arc::clone(&credentials),
        ))
    };
    let pull_domain = |domain: SyncDomain| -> Arc<dyn DomainSync> {
        Arc::new(RemotePullDomain::new(
            domain,
            format!("/webhook/tidemark-{domain}"),
            Arc::clone(&pull_source),
            client.blobs.clone(),
            Arc::clone(&credentials),
        ))
    };

    let domains = vec![
        diff_domain(SyncDomain::Calendar, EntityFamily::Events),
        diff_domain(SyncDomain::Reminders, EntityFamily::Reminders),
        pull_domain(SyncDomain::Dashboard),
        pull_domain(SyncDomain::Finance),
        pull_domain(SyncDomain::Documents),
        Arc::new(FeedStatusDomain::new(
            "/webhook/tidemark-feed-status",
            EXPECTED_FEEDS,
            Arc::clone(&pull_source),
            Arc::clone(&credentials),
        )) as Arc<dyn DomainSync>,
    ];

    Ok(SyncOrchestrator::new(
        domains,
        client.config.orchestrator,
    ))
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub kind: &'static str,
    pub description: String,
    pub priority: String,
    pub retry_count: u32,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub fn queued_to_item(item: &QueuedMutation) -> QueueItem {
    QueueItem {
        id: item.id.to_string(),
        kind: item.kind.name(),
        description: item.kind.describe(),
        priority: item.priority.to_string(),
        retry_count: item.retry_count,
        created_at: item.created_at.to_rfc3339(),
        last_error: None,
    }
}

pub fn failed_to_item(item: &FailedMutation) -> QueueItem {
    QueueItem {
        last_error: Some(item.last_error.clone()),
        ..queued_to_item(&item.mutation)
    }
}

pub fn format_queue_lines(items: &[QueuedMutation], now: DateTime<Utc>) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let description = truncate(&item.kind.describe(), 40);
            format!(
                "{}  {:<6}  {description:<40}  retries={}  {}",
                item.id,
                item.priority,
                item.retry_count,
                format_relative_time(item.created_at, now)
            )
        })
        .collect()
}

pub fn format_failed_lines(items: &[FailedMutation], now: DateTime<Utc>) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let description = truncate(&item.mutation.kind.describe(), 40);
            format!(
                "{}  {description:<40}  {}  {}",
                item.mutation.id,
                format_relative_time(item.failed_at, now),
                item.last_error
            )
        })
        .collect()
}

pub fn format_submit_outcome(description: &str, outcome: &SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::Delivered => format!("Logged {description}"),
        SubmitOutcome::Queued { pending, .. } => {
            let noun = if *pending == 1 { "entry" } else { "entries" };
            format!("Saved {description} offline ({pending} {noun} waiting to sync)")
        }
        SubmitOutcome::ConflictResolved { message } => format!("Already logged: {message}"),
    }
}

#[derive(Debug, Serialize)]
pub struct DomainItem {
    pub domain: SyncDomain,
    #[serde(flatten)]
    pub state: DomainState,
}

pub fn domain_items(states: &StateMap) -> Vec<DomainItem> {
    states
        .iter()
        .map(|(domain, state)| DomainItem {
            domain: *domain,
            state: state.clone(),
        })
        .collect()
}

pub fn format_domain_lines(states: &StateMap, now: DateTime<Utc>) -> Vec<String> {
    states
        .iter()
        .map(|(domain, state)| {
            let status = match &state.phase {
                DomainPhase::Idle => "idle".to_string(),
                DomainPhase::Syncing => "syncing".to_string(),
                DomainPhase::Succeeded { at } => format!("ok ({})", format_relative_time(*at, now)),
                DomainPhase::Failed { reason } => format!("failed: {reason}"),
            };
            match &state.detail {
                Some(detail) => format!("{:<14}  {status:<24}  {detail}", domain.as_str()),
                None => format!("{:<14}  {status}", domain.as_str()),
            }
        })
        .collect()
}

pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(at).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        at.format("%Y-%m-%d").to_string()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut shortened = text.chars().take(max_chars - 3).collect::<String>();
    shortened.push_str("...");
    shortened
}
