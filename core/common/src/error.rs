//! Common error types for crmsync.

use std::time::Duration;

use thiserror::Error;

/// Top-level error type for crmsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure talking to the CRM (connect, reset, DNS).
    #[error("Network error: {0}")]
    Network(String),

    /// A single request attempt exceeded its timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The CRM answered with a non-success status.
    #[error("CRM API {status}: {body}")]
    Api {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// The CRM answered successfully but the payload is unusable.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Destination store read or write failed.
    #[error("Store error: {0}")]
    Store(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller failed authentication.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The invocation queue is not running or dropped the request.
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl Error {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Covers transport failures, timeouts, HTTP 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout(_) => true,
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Server-provided delay hint (`Retry-After`), if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The CRM refused the pagination parameters of a request.
    pub fn is_cursor_rejection(&self) -> bool {
        matches!(self, Error::Api { status: 400 | 422, .. })
    }

    /// Failure of the destination store.
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
