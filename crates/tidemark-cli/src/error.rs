use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tidemark_core::Error),
    #[error(transparent)]
    Config(#[from] tidemark_core::config::ConfigError),
    #[error(transparent)]
    Remote(#[from] tidemark_core::remote::RemoteError),
    #[error(transparent)]
    Submit(#[from] tidemark_core::queue::SubmitError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Entry text cannot be empty")]
    EmptyText,
    #[error("Invalid queue entry id: {0}")]
    InvalidId(String),
    #[error("No queue entry with id {0}")]
    EntryNotFound(String),
    #[error("{0}")]
    UnknownDomain(String),
    #[error("Domain {0} is not configured for this client")]
    DomainNotConfigured(String),
    #[error("Keychain error: {0}")]
    Keychain(String),
}
