//! Typed failure taxonomy for transport and validation.
//!
//! The retry policy inspects these variants directly; nothing in the crate
//! decides behavior by matching on error text.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected the session token and it could not be repaired
    /// by a single re-authentication.
    #[error("session expired or not authenticated")]
    SessionExpired,

    /// The session is valid but lacks rights. Never triggers
    /// re-authentication and never retried.
    #[error("permission denied")]
    PermissionDenied,

    #[error("not found: {0}")]
    NotFound(String),

    /// Connect/timeout/5xx/429 failure that survived the retry budget.
    #[error("transient transport failure: {0}")]
    Transient(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Terminal HTTP error outside the retryable set.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid path {}: {reason}", .path.display())]
    PathValidation { path: PathBuf, reason: String },

    #[error("corrupt archive {}: {reason}", .path.display())]
    ArchiveCorrupt { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Classify a reqwest failure: connection and timeout errors are
    /// transient, everything else is terminal.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ApiError::Transient(err.to_string())
        } else {
            ApiError::Http {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                body: err.to_string(),
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let err = ApiError::Transient("connection refused".to_string());
        assert!(err.is_transient());
        assert!(!ApiError::PermissionDenied.is_transient());
        assert!(!ApiError::SessionExpired.is_transient());
    }
}
