//! Batching of local updates into single submissions.
//!
//! Local edits arrive one update per keystroke. The coalescer buffers them and
//! submits them merged, either when a fixed debounce window armed by the first
//! buffered edit expires or as soon as the buffered bytes reach the frame
//! ceiling.
//!
//! ```text
//!            local update
//!   Idle ───────────────────▶ Buffering ──(debounce fires / ceiling hit)──▶ Flushing
//!    ▲                                                                        │
//!    └───────────────────────────── buffer drained ───────────────────────────┘
//! ```
//!
//! Flushing is single-flight: updates that arrive while a batch is in flight
//! are picked up by the same flush loop once the batch is settled. A batch
//! that fails in transit is resent unchanged until it is accepted. A batch the
//! service rejects is dropped together with everything buffered behind it,
//! since those edits build on the refused ones, and reported as
//! [`SyncEvent::Rejected`].

use super::fetch::SyncTransport;
use crate::client::config::ClientConfig;
use crate::merge::merge_updates;
use crate::types::{Admission, Origin, SyncEvent, UpdateEvent};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Ordered buffer of pending local updates.
#[derive(Debug)]
pub struct Coalescer {
    buffer: VecDeque<Bytes>,
    pending_bytes: usize,
    max_batch: usize,
}

impl Coalescer {
    /// Create a buffer whose batches stay within `max_batch` bytes.
    pub fn new(max_batch: usize) -> Self {
        Coalescer {
            buffer: VecDeque::new(),
            pending_bytes: 0,
            max_batch,
        }
    }

    /// Buffer an update. Returns `true` once the buffered bytes reach the
    /// ceiling and the buffer should be flushed without waiting.
    pub fn push(&mut self, update: Bytes) -> bool {
        self.pending_bytes += update.len();
        self.buffer.push_back(update);
        self.pending_bytes >= self.max_batch
    }

    /// Number of buffered updates.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop everything buffered, returning how many updates were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.pending_bytes = 0;
        dropped
    }

    /// Total size of the buffered updates.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Merge the longest leading run of buffered updates whose merged size
    /// stays within the ceiling, and remove exactly that run.
    ///
    /// The first update is always taken, even when it alone exceeds the
    /// ceiling. If merging fails the run collected so far is returned.
    pub fn take_batch(&mut self) -> Option<Bytes> {
        let mut batch = self.buffer.pop_front()?;
        let mut taken = batch.len();
        let mut count = 1;

        while let Some(next) = self.buffer.front() {
            let merged = match merge_updates(&[&batch[..], &next[..]]) {
                Ok(merged) => merged,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to merge buffered update");
                    break;
                }
            };
            if merged.len() > self.max_batch {
                break;
            }
            taken += next.len();
            batch = merged;
            count += 1;
            self.buffer.pop_front();
        }

        self.pending_bytes = self.pending_bytes.saturating_sub(taken);
        tracing::debug!(
            updates = count,
            bytes = batch.len(),
            remaining = self.buffer.len(),
            "coalesced batch"
        );
        Some(batch)
    }
}

/// Drive the coalescer until `cancel` fires or the update feed closes.
///
/// Only [`Origin::Local`] events are buffered; remote updates came from the
/// service and are never echoed back.
pub async fn run_coalescer(
    mut updates: mpsc::UnboundedReceiver<UpdateEvent>,
    transport: Arc<dyn SyncTransport>,
    config: ClientConfig,
    events: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
) {
    let mut coalescer = Coalescer::new(config.max_frame_len as usize);
    let mut deadline: Option<Instant> = None;

    loop {
        let flush_now = tokio::select! {
            _ = cancel.cancelled() => break,
            event = updates.recv() => {
                let Some(event) = event else { break };
                match event.origin {
                    Origin::Local => {
                        let full = coalescer.push(event.update);
                        if !full && deadline.is_none() {
                            deadline = Some(Instant::now() + config.debounce());
                        }
                        full
                    }
                    Origin::Remote => false,
                }
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => true,
        };

        if flush_now {
            deadline = None;
            flush(
                &mut coalescer,
                &mut updates,
                transport.as_ref(),
                &config,
                &events,
                &cancel,
            )
            .await;
        }
    }

    if !coalescer.is_empty() {
        tracing::debug!(
            pending = coalescer.len(),
            "coalescer stopped with unsent updates"
        );
    }
}

async fn flush(
    coalescer: &mut Coalescer,
    updates: &mut mpsc::UnboundedReceiver<UpdateEvent>,
    transport: &dyn SyncTransport,
    config: &ClientConfig,
    events: &broadcast::Sender<SyncEvent>,
    cancel: &CancellationToken,
) {
    loop {
        while let Ok(event) = updates.try_recv() {
            if event.origin == Origin::Local {
                coalescer.push(event.update);
            }
        }
        let Some(batch) = coalescer.take_batch() else {
            return;
        };
        let accepted = send_batch(batch, transport, config, events, cancel).await;
        if cancel.is_cancelled() {
            return;
        }
        if !accepted {
            while updates.try_recv().is_ok() {}
            let dropped = coalescer.clear();
            if dropped > 0 {
                tracing::warn!(dropped, "discarding updates queued behind a refused batch");
            }
            return;
        }
    }
}

/// Submit one batch until it is settled. Returns `false` if it was refused.
async fn send_batch(
    batch: Bytes,
    transport: &dyn SyncTransport,
    config: &ClientConfig,
    events: &broadcast::Sender<SyncEvent>,
    cancel: &CancellationToken,
) -> bool {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match transport.submit(batch.clone()).await {
            Admission::Accepted => {
                tracing::debug!(bytes = batch.len(), attempt, "batch accepted");
                return true;
            }
            Admission::Rejected(reason) => {
                tracing::warn!(bytes = batch.len(), %reason, "batch rejected");
                let _ = events.send(SyncEvent::Rejected(reason));
                return false;
            }
            Admission::TransientFailure(reason) => {
                tracing::warn!(attempt, %reason, "submission failed, retrying");
            }
        }

        let delay = config.retry_delay();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return true;
        }
    }
}
