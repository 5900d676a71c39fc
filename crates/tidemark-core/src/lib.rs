//! tidemark-core - Core library for Tidemark
//!
//! This crate contains the local-first sync core shared by every Tidemark
//! client: the retry queue for outbound mutations, conflict handling, the
//! two-way diff synchronizer and the sync orchestrator, plus the storage and
//! HTTP layers they run on.

pub mod classify;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod db;
pub mod diffsync;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod rate_limit;
pub mod remote;
pub mod services;
pub mod util;

pub use classify::{classify, ErrorClass};
pub use config::ClientConfig;
pub use conflict::ConflictResolver;
pub use connectivity::Connectivity;
pub use diffsync::{DiffSynchronizer, LocalRecordProvider};
pub use error::{Error, Result};
pub use models::{MutationKind, Priority, SyncDomain};
pub use orchestrator::SyncOrchestrator;
pub use queue::RetryQueue;
pub use rate_limit::RateLimiter;
pub use services::BlobStore;
