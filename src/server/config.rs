//! Server configuration.

use crate::error::{Result, SyncError};
use crate::protocol::constants::{MAX_DOCUMENT_LEN, MAX_FRAME_LEN, TEXT_NAME};
use serde::Deserialize;

/// Environment variable holding the listen address.
pub const ADDR_ENV: &str = "NOTE_SYNC_ADDR";

/// Environment variable holding the document budget.
pub const MAX_LEN_ENV: &str = "NOTE_SYNC_MAX_LEN";

/// Configuration of the synchronization service and its HTTP front.
///
/// # Examples
///
/// ```
/// use note_sync_http::ServerConfig;
///
/// let config = ServerConfig::default().with_max_document_len(500);
/// assert_eq!(config.max_document_len, 500);
/// assert_eq!(config.text_name, "text");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Largest live length the document may reach, in UTF-16 units
    pub max_document_len: u64,
    /// Frame ceiling clients enforce; oversized pushes are logged
    pub max_frame_len: u64,
    /// Name of the sanctioned text container
    pub text_name: String,
    /// Capacity of the service command queue
    pub command_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            max_document_len: MAX_DOCUMENT_LEN,
            max_frame_len: MAX_FRAME_LEN,
            text_name: TEXT_NAME.to_string(),
            command_buffer: 1024,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `NOTE_SYNC_ADDR` and `NOTE_SYNC_MAX_LEN` when set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(ADDR_ENV) {
            config.bind_addr = addr;
        }
        if let Ok(max_len) = std::env::var(MAX_LEN_ENV) {
            config.max_document_len = max_len
                .trim()
                .parse()
                .map_err(|_| SyncError::Config(format!("{MAX_LEN_ENV}: not a number: {max_len}")))?;
        }
        Ok(config)
    }

    /// Set the bind address.
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Set the document budget.
    pub fn with_max_document_len(mut self, max: u64) -> Self {
        self.max_document_len = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_document_len, 2000);
        assert_eq!(config.max_frame_len, 1024 * 1024);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"bind_addr": "0.0.0.0:8080"}"#).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_document_len, 2000);
    }
}
