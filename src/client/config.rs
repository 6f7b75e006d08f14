//! Client configuration.

use crate::protocol::constants::MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and addressing options for a [`NoteSession`](super::NoteSession).
///
/// # Examples
///
/// ```
/// use note_sync_http::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("http://127.0.0.1:3000").with_debounce_ms(50);
/// assert_eq!(config.debounce(), Duration::from_millis(50));
/// assert_eq!(config.request_timeout(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the service, e.g. `http://127.0.0.1:3000`
    pub base_url: String,
    /// Deadline for one `/note` submission
    pub request_timeout_ms: u64,
    /// Delay between the first buffered local edit and the flush
    pub debounce_ms: u64,
    /// Delay before reopening a failed stream
    pub reconnect_delay_ms: u64,
    /// Pause between retries of a failed submission
    pub retry_delay_ms: u64,
    /// Largest frame accepted from the stream, and the ceiling of one
    /// coalesced submission
    pub max_frame_len: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            request_timeout_ms: 10_000,
            debounce_ms: 300,
            reconnect_delay_ms: 1_000,
            retry_delay_ms: 0,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    /// Default timings against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the debounce window.
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_delay_ms = ms;
        self
    }

    /// Set the pause between submission retries.
    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    /// Set the per-submission timeout.
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Submission timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Debounce window as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Retry pause as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
