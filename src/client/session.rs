//! One editing session against the service.
//!
//! A [`NoteSession`] owns a [`Replica`] and the two background tasks that keep
//! it synchronized:
//!
//! | Task | Input | Output |
//! |------|-------|--------|
//! | coalescer | local [`UpdateEvent`](crate::types::UpdateEvent)s | batched `POST /note` |
//! | reader | `POST /stream` frames | remote updates applied to the replica |
//!
//! The editing surface calls [`NoteSession::set_text`] with the full content
//! of its input and listens to [`NoteSession::events`] for ready, loading and
//! rejection notifications.
//!
//! # Examples
//!
//! ```no_run
//! use note_sync_http::client::{ClientConfig, NoteSession};
//!
//! # async fn run() -> note_sync_http::Result<()> {
//! let session = NoteSession::connect(ClientConfig::new("http://127.0.0.1:3000"))?;
//! session.set_text("shopping: milk, eggs");
//! println!("{}", session.text());
//! session.close().await;
//! # Ok(())
//! # }
//! ```

use super::coalescer::run_coalescer;
use super::config::ClientConfig;
use super::fetch::{SyncClient, SyncTransport};
use super::reader::run_reader;
use super::replica::Replica;
use crate::error::Result;
use crate::types::{SyncEvent, TextEdit};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 64;

/// A replica plus its coalescer and catch-up reader.
pub struct NoteSession {
    replica: Arc<Replica>,
    events: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl NoteSession {
    /// Connect to the service at `config.base_url` over HTTP.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(SyncClient::new(config.clone())?);
        Ok(Self::with_transport(transport, config))
    }

    /// Start a session over any transport.
    pub fn with_transport(transport: Arc<dyn SyncTransport>, config: ClientConfig) -> Self {
        let replica = Arc::new(Replica::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        let coalescer = tokio::spawn(run_coalescer(
            replica.subscribe(),
            transport.clone(),
            config.clone(),
            events.clone(),
            cancel.child_token(),
        ));
        let reader = tokio::spawn(run_reader(
            replica.clone(),
            transport,
            config.reconnect_delay(),
            events.clone(),
            cancel.child_token(),
        ));

        tracing::debug!(base_url = %config.base_url, "note session started");
        NoteSession {
            replica,
            events,
            cancel,
            tasks: vec![coalescer, reader],
        }
    }

    /// The local replica.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// Current local text.
    pub fn text(&self) -> String {
        self.replica.text()
    }

    /// Report the full content of the editing surface.
    ///
    /// Returns `false` when the content is unchanged.
    pub fn set_text(&self, text: &str) -> bool {
        self.replica.replace_text(text).is_some()
    }

    /// Apply a positional edit.
    pub fn apply_edit(&self, edit: &TextEdit) -> bool {
        self.replica.apply_edit(edit).is_some()
    }

    /// Subscribe to status notifications.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop both tasks and wait for them to finish.
    ///
    /// An in-flight submission is left to complete or time out.
    pub async fn close(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "session task ended abnormally");
            }
        }
        tracing::debug!("note session closed");
    }
}

impl Drop for NoteSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
