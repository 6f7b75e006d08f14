//! Error types for note synchronization.
//!
//! Every fallible operation in the crate returns [`Result`], whose error type
//! [`SyncError`] covers three families:
//!
//! | Family | Variants | Policy |
//! |--------|----------|--------|
//! | Framing | `FrameTooLarge`, `PrematureClose` | reader reconnects with backoff |
//! | Admission | `InvalidContent`, `InvalidAnchor`, `TooManyChanges`, `MergeFailure` | terminal for that update |
//! | Transport | `Http`, `Status`, `Timeout`, `Json` | client retries when [`SyncError::is_retryable`] |
//!
//! Admission errors are reported to the submitting client in the response body
//! and never mutate the shared document.

use thiserror::Error;

/// Result type alias for note sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by the framing layer, the validator, the service and the client.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A frame header declared a payload larger than the frame ceiling.
    #[error("frame too large: {len} bytes exceeds ceiling of {max} bytes")]
    FrameTooLarge {
        /// Declared payload length
        len: u64,
        /// Configured ceiling
        max: u64,
    },

    /// The byte stream ended before a complete frame was read.
    #[error("stream closed before a complete frame was read")]
    PrematureClose,

    /// An item carried something other than plain string content.
    #[error("invalid content: {0}")]
    InvalidContent(String),

    /// An item was anchored outside the sanctioned text container.
    #[error("invalid anchor: {0}")]
    InvalidAnchor(String),

    /// Admitting the update would push the document over its length budget.
    #[error("too many changes: document would hold {len} characters (max {max})")]
    TooManyChanges {
        /// Live length the merged document would have
        len: u64,
        /// Configured budget
        max: u64,
    },

    /// The document engine could not decode, merge or diff an update.
    #[error("merge failure: {0}")]
    MergeFailure(String),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(String),

    /// The service answered with an unexpected HTTP status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// Request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),

    /// The synchronization service task has shut down.
    #[error("synchronization service is not running")]
    ServiceClosed,
}

impl SyncError {
    /// Whether the operation that produced this error is worth retrying as is.
    ///
    /// A garbled reply counts as retryable since intermediaries produce them.
    /// Client-side statuses other than timeouts and throttling do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Status(status) => *status >= 500 || *status == 408 || *status == 429,
            SyncError::Http(_)
            | SyncError::Timeout
            | SyncError::Json(_)
            | SyncError::PrematureClose
            | SyncError::ServiceClosed => true,
            _ => false,
        }
    }

    /// Whether this error is an admission rejection (terminal for that update).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidContent(_)
                | SyncError::InvalidAnchor(_)
                | SyncError::TooManyChanges { .. }
                | SyncError::MergeFailure(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else {
            SyncError::Http(err.to_string())
        }
    }
}

impl From<yrs::encoding::read::Error> for SyncError {
    fn from(err: yrs::encoding::read::Error) -> Self {
        SyncError::MergeFailure(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Config(err.to_string())
    }
}
