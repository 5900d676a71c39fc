//! Retry policy: maps every remote failure to one of four classes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::remote::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network trouble or server hiccup. Safe to replay later.
    Transient,
    /// The request itself is wrong. Replaying will not help.
    ClientError,
    /// Credentials are missing or rejected. Needs re-authentication.
    AuthError,
    /// Malformed request or response.
    Permanent,
}

impl ErrorClass {
    /// Only transient failures enter the retry queue.
    #[must_use]
    pub const fn should_queue(self) -> bool {
        matches!(self, Self::Transient)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::ClientError => "client_error",
            Self::AuthError => "auth_error",
            Self::Permanent => "permanent",
        }
    }

    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::Transient => "Saved locally. Will sync when the connection recovers.",
            Self::ClientError => "The request was rejected. Check the values you entered.",
            Self::AuthError => "Authentication failed. Check your API key.",
            Self::Permanent => "The request could not be processed.",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a failure. Pure; no logging, no state.
#[must_use]
pub fn classify(error: &RemoteError) -> ErrorClass {
    match error {
        RemoteError::AuthenticationRequired => ErrorClass::AuthError,
        RemoteError::Status { status, .. } => classify_status(*status),
        RemoteError::Conflict { .. } | RemoteError::Rejected(_) | RemoteError::Validation(_) => {
            ErrorClass::ClientError
        }
        RemoteError::Decode(_) | RemoteError::InvalidUrl(_) | RemoteError::InvalidResponse => {
            ErrorClass::Permanent
        }
        RemoteError::Offline
        | RemoteError::Connectivity(_)
        | RemoteError::Timeout
        | RemoteError::MissingApiKey
        | RemoteError::RateLimited { .. }
        | RemoteError::Other(_) => ErrorClass::Transient,
    }
}

/// Classify a bare HTTP status code.
#[must_use]
pub const fn classify_status(status: u16) -> ErrorClass {
    match status {
        401 | 403 => ErrorClass::AuthError,
        400..=499 => ErrorClass::ClientError,
        500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}
