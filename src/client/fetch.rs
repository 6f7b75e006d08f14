//! HTTP transport to the synchronization service.
//!
//! [`SyncTransport`] is the seam between the session tasks and the network:
//! the reader opens streams through it and the coalescer submits batches
//! through it. [`SyncClient`] is the `reqwest` implementation.
//!
//! # Examples
//!
//! ```ignore
//! use note_sync_http::client::{ClientConfig, SyncClient, SyncTransport};
//! use note_sync_http::merge::empty_state_vector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SyncClient::new(ClientConfig::new("http://127.0.0.1:3000"))?;
//!
//!     let mut frames = client.open_stream(empty_state_vector()).await?;
//!     while let Ok(payload) = frames.next_frame().await {
//!         println!("update of {} bytes", payload.len());
//!     }
//!     Ok(())
//! }
//! ```

use crate::client::config::ClientConfig;
use crate::error::{Result, SyncError};
use crate::protocol::constants::routes;
use crate::protocol::read_frame;
use crate::types::{Admission, NoteResponse};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use url::Url;

/// Network operations a session needs.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Open the push stream, announcing the state vector already held.
    async fn open_stream(&self, state_vector: Bytes) -> Result<FrameReader>;

    /// Submit one update and classify the outcome.
    async fn submit(&self, update: Bytes) -> Admission;
}

/// Reads frame payloads off a streamed response body.
pub struct FrameReader {
    stream: BoxStream<'static, Result<Bytes>>,
    leftover: BytesMut,
    max_len: u64,
}

impl FrameReader {
    /// Wrap a chunk stream.
    pub fn new(stream: BoxStream<'static, Result<Bytes>>, max_len: u64) -> Self {
        FrameReader {
            stream,
            leftover: BytesMut::new(),
            max_len,
        }
    }

    /// Read the next complete payload.
    ///
    /// # Errors
    ///
    /// [`SyncError::PrematureClose`] when the body ends, [`SyncError::FrameTooLarge`]
    /// on an oversized header, [`SyncError::Http`] when the body errors.
    pub async fn next_frame(&mut self) -> Result<Bytes> {
        let leftover = std::mem::take(&mut self.leftover);
        let (payload, rest) = read_frame(&mut self.stream, leftover, self.max_len).await?;
        self.leftover = rest;
        Ok(payload)
    }
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("buffered", &self.leftover.len())
            .field("max_len", &self.max_len)
            .finish()
    }
}

/// `reqwest`-backed client for the `/stream` and `/note` endpoints.
#[derive(Clone)]
pub struct SyncClient {
    client: reqwest::Client,
    stream_url: Url,
    note_url: Url,
    config: Arc<ClientConfig>,
}

impl SyncClient {
    /// Build a client for `config.base_url`.
    ///
    /// # Errors
    ///
    /// [`SyncError::Config`] if the base URL does not parse.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)?;
        let stream_url = base.join(routes::STREAM)?;
        let note_url = base.join(routes::NOTE)?;

        // no client-wide timeout: the stream is open indefinitely
        let client = reqwest::Client::builder()
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        Ok(SyncClient {
            client,
            stream_url,
            note_url,
            config: Arc::new(config),
        })
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn post_note(&self, update: Bytes) -> Result<NoteResponse> {
        let response = self
            .client
            .post(self.note_url.clone())
            .timeout(self.config.request_timeout())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(update)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl SyncTransport for SyncClient {
    async fn open_stream(&self, state_vector: Bytes) -> Result<FrameReader> {
        let response = self
            .client
            .post(self.stream_url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(state_vector)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SyncError::from))
            .boxed();
        Ok(FrameReader::new(stream, self.config.max_frame_len))
    }

    async fn submit(&self, update: Bytes) -> Admission {
        match self.post_note(update).await {
            Ok(response) => Admission::from(response),
            Err(e) if e.is_retryable() => Admission::TransientFailure(e.to_string()),
            Err(e) => Admission::Rejected(e.to_string()),
        }
    }
}
