//! Remote endpoint boundary.
//!
//! Every outbound call in the crate goes through one of the traits below so
//! the queue, the diff synchronizer and the orchestrator can be exercised
//! against in-memory fakes. [`HttpRemote`] is the production implementation.

mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{EntityFamily, MutationKind, RemoteRecord, SyncBatch, SyncConfirmation, ValidationError};

pub use http::HttpRemote;

/// Failure raised where a remote call first fails.
///
/// Only [`crate::classify::classify`] interprets these; downstream code acts on
/// the resulting [`crate::classify::ErrorClass`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Device is offline")]
    Offline,
    #[error("Could not reach the server: {0}")]
    Connectivity(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("No API key configured")]
    MissingApiKey,
    #[error("Server returned {message}")]
    Status { status: u16, message: String },
    /// 409 with the raw body, handed to the conflict resolver.
    #[error("Server reported a conflict")]
    Conflict { body: String },
    #[error("Could not decode response: {0}")]
    Decode(String),
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid response from server")]
    InvalidResponse,
    /// 200 answer carrying `{"success": false}`.
    #[error("Server rejected the request: {0}")]
    Rejected(String),
    #[error("Rate limit exceeded; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Other(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Fire-and-forget mutation endpoints, one per [`MutationKind`].
#[async_trait]
pub trait MutationTransport: Send + Sync {
    async fn send(&self, kind: &MutationKind) -> RemoteResult<()>;
}

/// Sync-state endpoints of one diff-synchronized family.
#[async_trait]
pub trait SyncStateRemote: Send + Sync {
    async fn fetch_sync_state(&self, family: EntityFamily) -> RemoteResult<Vec<RemoteRecord>>;

    async fn push_batch(&self, family: EntityFamily, batch: &SyncBatch) -> RemoteResult<()>;

    async fn confirm_sync(
        &self,
        family: EntityFamily,
        confirmations: &[SyncConfirmation],
    ) -> RemoteResult<()>;
}

/// Read-only summary endpoints used by pull domains.
#[async_trait]
pub trait PullSource: Send + Sync {
    async fn fetch(&self, path: &str) -> RemoteResult<serde_json::Value>;
}

/// Supplies the API key for outbound calls. `None` means "skip the call".
pub trait CredentialProvider: Send + Sync {
    fn api_key(&self) -> Option<String>;
}

/// Fixed key, usually taken from [`crate::config::ClientConfig::api_key`].
#[derive(Clone, Default)]
pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn new(api_key: Option<String>) -> Self {
        Self(crate::util::normalize_text_option(api_key))
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_tuple("StaticCredentials")
            .field(&self.0.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl CredentialProvider for StaticCredentials {
    fn api_key(&self) -> Option<String> {
        self.0.clone()
    }
}
