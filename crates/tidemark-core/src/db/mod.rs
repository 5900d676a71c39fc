//! Database layer for Tidemark

mod blob_repository;
mod connection;
mod migrations;

pub use blob_repository::{BlobRepository, LibSqlBlobRepository, StoredBlob};
pub use connection::Database;
