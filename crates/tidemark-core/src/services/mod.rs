//! Long-lived services shared across components.

mod blob_store;

pub use blob_store::BlobStore;
