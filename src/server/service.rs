//! The synchronization service: sole owner of the authoritative document.
//!
//! The service runs as one tokio task. It owns the encoded document and the
//! subscriber registry, and handles [`Command`]s strictly one at a time, so
//! admission (validate, merge, re-validate, commit, fan out) never interleaves
//! with another admission or with a subscriber's initial snapshot read.
//! Everything else talks to it through a cloneable [`SyncHandle`].
//!
//! # Fan-out
//!
//! Each subscriber keeps the state vector it connected with for the lifetime
//! of its connection. After every committed update the service sends each
//! subscriber the diff between the whole document and that original vector.
//! Pushes are cumulative: a subscriber that is behind receives a larger diff,
//! never a skipped one.
//!
//! # Examples
//!
//! ```ignore
//! use note_sync_http::server::{SyncService, ServerConfig};
//! use futures::StreamExt;
//!
//! let handle = SyncService::spawn(ServerConfig::default());
//! let mut subscription = handle.subscribe(empty_state_vector()).await?;
//! let first_frame = subscription.next().await;
//! handle.submit(update).await?;
//! ```

use super::config::ServerConfig;
use super::validate::{check_integrity, validate};
use crate::error::{Result, SyncError};
use crate::merge::{check_state_vector, decode_update, diff_update, empty_update, merge_updates};
use crate::types::Stats;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Messages accepted by the service task.
#[derive(Debug)]
pub enum Command {
    /// Register a subscriber and send it its catch-up diff
    Subscribe {
        /// Encoded state vector of the connecting client
        state_vector: Bytes,
        /// Receives the subscriber id and its frame channel
        reply: oneshot::Sender<Result<(Uuid, mpsc::UnboundedReceiver<Bytes>)>>,
    },
    /// Admit an update
    Submit {
        /// Encoded update blob
        update: Bytes,
        /// Receives the merged document's totals, or the rejection
        reply: oneshot::Sender<Result<Stats>>,
    },
    /// Forget a subscriber
    Unsubscribe {
        /// Subscriber id
        id: Uuid,
    },
    /// Read the current state
    Snapshot {
        /// Receives the snapshot
        reply: oneshot::Sender<Snapshot>,
    },
}

/// Point-in-time view of the service state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Encoded document
    pub document: Bytes,
    /// Live length in UTF-16 units
    pub len: u64,
    /// Number of registered subscribers
    pub subscribers: usize,
}

struct Subscriber {
    state_vector: Bytes,
    frames: mpsc::UnboundedSender<Bytes>,
}

/// The service task state.
pub struct SyncService {
    config: ServerConfig,
    document: Bytes,
    subscribers: HashMap<Uuid, Subscriber>,
    commands: mpsc::Receiver<Command>,
}

impl SyncService {
    /// Start the service on the current tokio runtime.
    pub fn spawn(config: ServerConfig) -> SyncHandle {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let service = SyncService {
            config,
            document: empty_update(),
            subscribers: HashMap::new(),
            commands: rx,
        };
        tokio::spawn(service.run());
        SyncHandle { commands: tx }
    }

    async fn run(mut self) {
        tracing::info!(
            max_document_len = self.config.max_document_len,
            "synchronization service started"
        );
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        tracing::info!("synchronization service stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                state_vector,
                reply,
            } => {
                let _ = reply.send(self.subscribe(state_vector));
            }
            Command::Submit { update, reply } => {
                let _ = reply.send(self.submit(&update));
            }
            Command::Unsubscribe { id } => {
                if self.subscribers.remove(&id).is_some() {
                    tracing::info!(%id, remaining = self.subscribers.len(), "subscriber disconnected");
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn subscribe(&mut self, state_vector: Bytes) -> Result<(Uuid, mpsc::UnboundedReceiver<Bytes>)> {
        check_state_vector(&state_vector)?;
        let initial = diff_update(&self.document, &state_vector)?;

        let (tx, rx) = mpsc::unbounded_channel();
        // receiver is alive, cannot fail
        let _ = tx.send(initial);

        let id = Uuid::new_v4();
        self.subscribers.insert(
            id,
            Subscriber {
                state_vector,
                frames: tx,
            },
        );
        tracing::info!(%id, subscribers = self.subscribers.len(), "subscriber connected");
        Ok((id, rx))
    }

    fn submit(&mut self, raw: &[u8]) -> Result<Stats> {
        let text_name = self.config.text_name.as_str();

        let incoming = decode_update(raw)?;
        let own = validate(&incoming, text_name)?;

        let candidate = merge_updates(&[&self.document, raw])?;
        let merged = decode_update(&candidate)?;
        let stats = validate(&merged, text_name)?;
        check_integrity(&merged)?;

        let len = stats.net_len();
        if len > self.config.max_document_len {
            return Err(SyncError::TooManyChanges {
                len,
                max: self.config.max_document_len,
            });
        }

        self.document = candidate;
        tracing::debug!(
            inserted = own.inserted_chars,
            deleted = own.deleted_chars,
            len,
            bytes = self.document.len(),
            "update admitted"
        );
        self.broadcast();
        Ok(stats)
    }

    fn broadcast(&mut self) {
        let document = &self.document;
        let max_frame_len = self.config.max_frame_len;
        self.subscribers.retain(|id, subscriber| {
            let delta = match diff_update(document, &subscriber.state_vector) {
                Ok(delta) => delta,
                Err(e) => {
                    tracing::error!(%id, error = %e, "failed to diff document for subscriber");
                    return true;
                }
            };
            if delta.len() as u64 > max_frame_len {
                tracing::warn!(%id, bytes = delta.len(), "catch-up diff exceeds frame ceiling");
            }
            let delivered = subscriber.frames.send(delta).is_ok();
            if !delivered {
                tracing::debug!(%id, "dropping closed subscriber");
            }
            delivered
        });
    }

    fn snapshot(&self) -> Snapshot {
        let len = decode_update(&self.document)
            .and_then(|decoded| validate(&decoded, &self.config.text_name))
            .map(|stats| stats.net_len())
            .unwrap_or_default();
        Snapshot {
            document: self.document.clone(),
            len,
            subscribers: self.subscribers.len(),
        }
    }
}

/// Cloneable handle to a running [`SyncService`].
#[derive(Clone, Debug)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
}

impl SyncHandle {
    /// Register a subscriber whose replica has seen `state_vector`.
    ///
    /// The first item of the returned subscription is the catch-up diff.
    pub async fn subscribe(&self, state_vector: Bytes) -> Result<Subscription> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            state_vector,
            reply,
        })
        .await?;
        let (id, frames) = rx.await.map_err(|_| SyncError::ServiceClosed)??;
        Ok(Subscription {
            id,
            frames,
            _guard: UnsubscribeGuard {
                id,
                commands: self.commands.clone(),
            },
        })
    }

    /// Admit `update`, returning the merged document's totals.
    ///
    /// # Errors
    ///
    /// Rejections ([`SyncError::is_rejection`]) leave the document untouched.
    pub async fn submit(&self, update: Bytes) -> Result<Stats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { update, reply }).await?;
        rx.await.map_err(|_| SyncError::ServiceClosed)?
    }

    /// Current document and registry size.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| SyncError::ServiceClosed)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::ServiceClosed)
    }
}

/// Sends `Unsubscribe` when the subscription goes away.
#[derive(Debug)]
struct UnsubscribeGuard {
    id: Uuid,
    commands: mpsc::Sender<Command>,
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        // if the queue is full the closed channel is pruned on the next broadcast
        let _ = self.commands.try_send(Command::Unsubscribe { id: self.id });
    }
}

/// A live registration: yields frame payloads until dropped.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    frames: mpsc::UnboundedReceiver<Bytes>,
    _guard: UnsubscribeGuard,
}

impl Subscription {
    /// Subscriber id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next payload, or `None` once the service has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }
}

impl Stream for Subscription {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Replica;
    use crate::merge::empty_state_vector;
    use crate::types::Origin;

    async fn next(subscription: &mut Subscription) -> Bytes {
        tokio::time::timeout(std::time::Duration::from_secs(5), subscription.recv())
            .await
            .expect("frame within timeout")
            .expect("subscription open")
    }

    #[tokio::test]
    async fn test_initial_frame_brings_stale_replica_up_to_date() {
        let handle = SyncService::spawn(ServerConfig::default());
        let writer = Replica::new();
        let update = writer.replace_text("hello").unwrap();
        handle.submit(update).await.unwrap();

        let mut subscription = handle.subscribe(empty_state_vector()).await.unwrap();
        let first = next(&mut subscription).await;

        let reader = Replica::new();
        reader.apply_update(&first, Origin::Remote).unwrap();
        assert_eq!(reader.text(), "hello");
    }

    #[tokio::test]
    async fn test_fan_out_is_cumulative_from_original_vector() {
        let handle = SyncService::spawn(ServerConfig::default());
        let mut subscription = handle.subscribe(empty_state_vector()).await.unwrap();
        let _initial = next(&mut subscription).await;

        let writer = Replica::new();
        handle.submit(writer.replace_text("ab").unwrap()).await.unwrap();
        handle.submit(writer.replace_text("abcd").unwrap()).await.unwrap();

        let _first_push = next(&mut subscription).await;
        let second_push = next(&mut subscription).await;

        // the second push alone carries everything since connection time
        let fresh = Replica::new();
        fresh.apply_update(&second_push, Origin::Remote).unwrap();
        assert_eq!(fresh.text(), "abcd");
    }

    #[tokio::test]
    async fn test_budget_rejects_and_leaves_document_unchanged() {
        let handle = SyncService::spawn(ServerConfig::default());
        let writer = Replica::new();
        let base = "a".repeat(1999);
        let stats = handle
            .submit(writer.replace_text(&base).unwrap())
            .await
            .unwrap();
        assert_eq!(stats.net_len(), 1999);

        let over = writer.replace_text(&format!("{base}bc")).unwrap();
        let err = handle.submit(over).await.unwrap_err();
        assert!(
            matches!(err, SyncError::TooManyChanges { len: 2001, max: 2000 }),
            "{err}"
        );

        let mut subscription = handle.subscribe(empty_state_vector()).await.unwrap();
        let reader = Replica::new();
        reader
            .apply_update(&next(&mut subscription).await, Origin::Remote)
            .unwrap();
        assert_eq!(reader.text(), base);
        assert_eq!(handle.snapshot().await.unwrap().len, 1999);
    }

    #[tokio::test]
    async fn test_deletions_free_budget() {
        let handle = SyncService::spawn(ServerConfig::default().with_max_document_len(5));
        let writer = Replica::new();
        handle
            .submit(writer.replace_text("12345").unwrap())
            .await
            .unwrap();
        handle.submit(writer.replace_text("1").unwrap()).await.unwrap();
        let stats = handle
            .submit(writer.replace_text("1abcd").unwrap())
            .await
            .unwrap();
        assert_eq!(stats.net_len(), 5);
    }

    #[tokio::test]
    async fn test_edit_chained_on_refused_text_rejected() {
        let handle = SyncService::spawn(ServerConfig::default().with_max_document_len(5));
        let author = Replica::new();
        handle
            .submit(author.replace_text("abc").unwrap())
            .await
            .unwrap();

        let err = handle
            .submit(author.replace_text("abcdef").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::TooManyChanges { len: 6, max: 5 }), "{err}");

        // the author never saw the refusal and keeps typing on top of "def"
        let err = handle
            .submit(author.replace_text("abcdeZ").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidAnchor(_)), "{err}");

        let mut subscription = handle.subscribe(empty_state_vector()).await.unwrap();
        let reader = Replica::new();
        reader
            .apply_update(&next(&mut subscription).await, Origin::Remote)
            .unwrap();
        assert_eq!(reader.text(), "abc");
        assert_eq!(handle.snapshot().await.unwrap().len, 3);
    }

    #[tokio::test]
    async fn test_invalid_update_rejected_without_mutation() {
        let handle = SyncService::spawn(ServerConfig::default());
        let err = handle
            .submit(Bytes::from_static(&[0xff, 0x01]))
            .await
            .unwrap_err();
        assert!(err.is_rejection());

        let doc = yrs::Doc::new();
        let other = doc.get_or_insert_text("other");
        let update = {
            use yrs::{Text, Transact};
            let mut txn = doc.transact_mut();
            other.insert(&mut txn, 0, "x");
            txn.encode_update_v1()
        };
        let err = handle.submit(Bytes::from(update)).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidAnchor(_)));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len, 0);
        assert_eq!(snapshot.document, empty_update());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_converge() {
        let handle = SyncService::spawn(ServerConfig::default());
        let mut early = handle.subscribe(empty_state_vector()).await.unwrap();
        let _ = next(&mut early).await;

        let alice = Replica::new();
        let bob = Replica::new();
        let from_alice = alice.replace_text("alice").unwrap();
        let from_bob = bob.replace_text("bob").unwrap();

        let (a, b) = tokio::join!(
            handle.submit(from_alice.clone()),
            handle.submit(from_bob.clone())
        );
        a.unwrap();
        b.unwrap();

        // early subscriber: apply every push in order
        let early_replica = Replica::new();
        for _ in 0..2 {
            early_replica
                .apply_update(&next(&mut early).await, Origin::Remote)
                .unwrap();
        }

        // late subscriber: one catch-up frame
        let mut late = handle.subscribe(empty_state_vector()).await.unwrap();
        let late_replica = Replica::new();
        late_replica
            .apply_update(&next(&mut late).await, Origin::Remote)
            .unwrap();

        // the writers exchange updates in opposite orders
        alice.apply_update(&from_bob, Origin::Remote).unwrap();
        bob.apply_update(&from_alice, Origin::Remote).unwrap();

        let expected = alice.text();
        assert_eq!(expected.len(), 8);
        assert_eq!(bob.text(), expected);
        assert_eq!(early_replica.text(), expected);
        assert_eq!(late_replica.text(), expected);
    }

    #[tokio::test]
    async fn test_insert_at_head_of_existing_text() {
        let handle = SyncService::spawn(ServerConfig::default());
        let writer = Replica::new();
        handle
            .submit(writer.replace_text("world").unwrap())
            .await
            .unwrap();
        handle
            .submit(writer.replace_text("hello world").unwrap())
            .await
            .unwrap();

        let mut subscription = handle.subscribe(empty_state_vector()).await.unwrap();
        let reader = Replica::new();
        reader
            .apply_update(&next(&mut subscription).await, Origin::Remote)
            .unwrap();
        assert_eq!(reader.text(), "hello world");
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_removed() {
        let handle = SyncService::spawn(ServerConfig::default());
        let subscription = handle.subscribe(empty_state_vector()).await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap().subscribers, 1);

        drop(subscription);
        assert_eq!(handle.snapshot().await.unwrap().subscribers, 0);
    }

    #[tokio::test]
    async fn test_bad_state_vector_rejected() {
        let handle = SyncService::spawn(ServerConfig::default());
        let err = handle
            .subscribe(Bytes::from_static(&[0xff]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MergeFailure(_)));
        assert_eq!(handle.snapshot().await.unwrap().subscribers, 0);
    }
}
