//! Client-side document replica.
//!
//! A [`Replica`] wraps one `yrs::Doc` holding the single `"text"` container.
//! Local edits and applied remote updates both emit an [`UpdateEvent`] tagged
//! with its [`Origin`], so the session can forward local changes to the
//! coalescer and ignore the rest.
//!
//! The doc is configured with UTF-16 offsets so positions produced by
//! [`diff`](super::diff) line up with the engine's indexing.

use super::diff::diff;
use crate::error::{Result, SyncError};
use crate::protocol::constants::TEXT_NAME;
use crate::types::{Origin, TextEdit, UpdateEvent};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, OffsetKind, Options, ReadTxn, Text, TextRef, Transact, Update};

struct Inner {
    doc: Doc,
    text: TextRef,
}

impl Inner {
    fn fresh() -> Self {
        let mut options = Options::default();
        options.offset_kind = OffsetKind::Utf16;
        let doc = Doc::with_options(options);
        let text = doc.get_or_insert_text(TEXT_NAME);
        Inner { doc, text }
    }
}

/// A local copy of the shared document.
pub struct Replica {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<UpdateEvent>>>,
}

impl Replica {
    /// Create an empty replica with a random client id.
    pub fn new() -> Self {
        Replica {
            inner: Mutex::new(Inner::fresh()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Discard all content and start over under a new client id.
    ///
    /// Listeners stay registered. Used when the service refused local edits
    /// the replica already holds; the catch-up stream refills it.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::fresh();
    }

    /// Client id stamped on local edits.
    pub fn client_id(&self) -> u64 {
        self.inner.lock().doc.client_id()
    }

    /// Register for change notifications.
    ///
    /// Every local edit and every applied remote update is delivered, in order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UpdateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    /// Current text content.
    pub fn text(&self) -> String {
        let inner = self.inner.lock();
        let txn = inner.doc.transact();
        inner.text.get_string(&txn)
    }

    /// Current length in UTF-16 units.
    pub fn len(&self) -> u32 {
        let inner = self.inner.lock();
        let txn = inner.doc.transact();
        inner.text.len(&txn)
    }

    /// Whether the text is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded state vector of everything this replica has seen.
    pub fn state_vector(&self) -> Bytes {
        let inner = self.inner.lock();
        let txn = inner.doc.transact();
        Bytes::from(txn.state_vector().encode_v1())
    }

    /// Apply a positional edit and return the update it produced.
    ///
    /// Returns `None` for a no-op edit. Ranges past the end of the text are
    /// clamped.
    pub fn apply_edit(&self, edit: &TextEdit) -> Option<Bytes> {
        if edit.is_noop() {
            return None;
        }
        let update = {
            let inner = self.inner.lock();
            let mut txn = inner.doc.transact_mut();
            let len = inner.text.len(&txn);
            let start = edit.start.min(len);
            let delete_count = edit.delete_count.min(len - start);
            if delete_count > 0 {
                inner.text.remove_range(&mut txn, start, delete_count);
            }
            if !edit.inserted.is_empty() {
                inner.text.insert(&mut txn, start, &edit.inserted);
            }
            Bytes::from(txn.encode_update_v1())
        };
        self.notify(UpdateEvent {
            update: update.clone(),
            origin: Origin::Local,
        });
        Some(update)
    }

    /// Replace the whole text, the way a text input reports changes.
    ///
    /// The edit is computed against the current content while holding the
    /// replica lock, so a concurrent remote update cannot misalign it.
    pub fn replace_text(&self, current: &str) -> Option<Bytes> {
        let update = {
            let inner = self.inner.lock();
            let mut txn = inner.doc.transact_mut();
            let previous = inner.text.get_string(&txn);
            let edit = diff(&previous, current);
            if edit.is_noop() {
                return None;
            }
            if edit.delete_count > 0 {
                inner.text.remove_range(&mut txn, edit.start, edit.delete_count);
            }
            if !edit.inserted.is_empty() {
                inner.text.insert(&mut txn, edit.start, &edit.inserted);
            }
            Bytes::from(txn.encode_update_v1())
        };
        tracing::debug!(bytes = update.len(), "local edit");
        self.notify(UpdateEvent {
            update: update.clone(),
            origin: Origin::Local,
        });
        Some(update)
    }

    /// Integrate an encoded update.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MergeFailure`] if the bytes are not a valid update.
    pub fn apply_update(&self, update: &[u8], origin: Origin) -> Result<()> {
        let decoded = Update::decode_v1(update)?;
        {
            let inner = self.inner.lock();
            let mut txn = inner.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| SyncError::MergeFailure(e.to_string()))?;
        }
        self.notify(UpdateEvent {
            update: Bytes::copy_from_slice(update),
            origin,
        });
        Ok(())
    }

    fn notify(&self, event: UpdateEvent) {
        self.listeners
            .lock()
            .retain(|listener| listener.send(event.clone()).is_ok());
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}
