//! Data models for Tidemark

mod domain;
mod mutation;
mod record;
mod sync_conflict;

pub use domain::{DataSource, DomainPhase, DomainReport, DomainState, SyncDomain};
pub use mutation::{FailedMutation, MutationId, MutationKind, Priority, QueuedMutation, ValidationError};
pub use record::{
    ConfirmAction, EntityFamily, LocalRecord, RecordFields, RecordOrigin, RemoteRecord, SyncBatch,
    SyncConfirmation, SyncStatus, SyncWindow, REMOTE_ORIGIN_PREFIX,
};
pub use sync_conflict::{ConflictType, ResolvedConflict, Resolution, SyncConflict};
