//! Failure taxonomy for every call that leaves the process.
//!
//! Classification rules:
//!   no stored token        → Unauthenticated (fail fast, no request is made)
//!   HTTP 401               → SessionExpired  (credentials are cleared, never retried)
//!   HTTP 5xx / transport   → Transient       (retried within a bounded budget)
//!   other HTTP 4xx         → Permanent       (surfaced immediately, never retried)
//!   caller-initiated abort → Cancelled       (distinct from Transient, never retried)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no access token is stored; sign in first")]
    Unauthenticated,

    #[error("session expired; re-authentication required")]
    SessionExpired,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request rejected [{status}]: {message}")]
    Permanent { status: u16, message: String },

    #[error("request cancelled by caller")]
    Cancelled,

    #[error("failed to decode response body: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// Classify a non-success HTTP status. 401 is the sole session-expiry
    /// trigger; everything else in 4xx is permanent, 5xx is transient.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => ApiError::SessionExpired,
            s if s >= 500 => ApiError::Transient(format!("server error [{s}]: {message}")),
            s => ApiError::Permanent { status: s, message },
        }
    }

    /// Whether a bounded retry may resolve this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }

    /// Whether the stored session is gone and all polling must stop.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            // Timeouts, connection resets, aborted sockets: all worth one retry.
            ApiError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}
