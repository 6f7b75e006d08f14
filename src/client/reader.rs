//! Persistent catch-up loop.
//!
//! Opens the push stream with the replica's current state vector and applies
//! every frame as a remote update. After any stream failure the reader emits
//! [`SyncEvent::Loading`], waits the reconnect delay and reopens the stream
//! with a freshly computed state vector, so nothing admitted in between is
//! missed. Cancellation ends the loop without reconnecting.
//!
//! A [`SyncEvent::Rejected`] means the replica holds edits the service never
//! admitted. The reader then drops its connection, resets the replica and
//! reconnects at once with the empty state vector, so the replica is rebuilt
//! from the admitted document alone.

use super::fetch::SyncTransport;
use super::replica::Replica;
use crate::error::Result;
use crate::types::{Origin, SyncEvent};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Keep `replica` up to date until `cancel` fires.
pub async fn run_reader(
    replica: Arc<Replica>,
    transport: Arc<dyn SyncTransport>,
    reconnect_delay: Duration,
    events: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
) {
    let mut notices = events.subscribe();
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = read_connection(&replica, transport.as_ref(), &events) => result,
            _ = next_rejection(&mut notices) => {
                replica.reset();
                tracing::info!(client = replica.client_id(), "local edits refused, resyncing replica");
                let _ = events.send(SyncEvent::Loading);
                continue;
            }
        };
        let error = match result {
            Ok(never) => match never {},
            Err(error) => error,
        };

        tracing::warn!(%error, delay = ?reconnect_delay, "stream lost, reconnecting");
        let _ = events.send(SyncEvent::Loading);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    tracing::debug!("catch-up reader stopped");
}

/// Resolve on the next rejection notice. A lagged receiver may have missed
/// one, so lagging counts too.
async fn next_rejection(notices: &mut broadcast::Receiver<SyncEvent>) {
    loop {
        match notices.recv().await {
            Ok(SyncEvent::Rejected(_)) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Read one connection until it fails.
async fn read_connection(
    replica: &Replica,
    transport: &dyn SyncTransport,
    events: &broadcast::Sender<SyncEvent>,
) -> Result<Infallible> {
    let mut frames = transport.open_stream(replica.state_vector()).await?;
    let mut ready = false;

    loop {
        let payload = frames.next_frame().await?;
        replica.apply_update(&payload, Origin::Remote)?;
        if !ready {
            ready = true;
            tracing::info!(len = replica.len(), "caught up with service");
            let _ = events.send(SyncEvent::Ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::coalescer::tests::ScriptedTransport;
    use crate::client::fetch::FrameReader;
    use crate::error::SyncError;
    use crate::protocol::constants::MAX_FRAME_LEN;
    use crate::protocol::encode_frame;
    use bytes::Bytes;
    use futures::StreamExt;

    /// A stream delivering `payloads` and then either ending or hanging.
    fn reader_of(payloads: Vec<Bytes>, hang: bool) -> FrameReader {
        let chunks = futures::stream::iter(
            payloads
                .into_iter()
                .map(|p| Ok::<_, SyncError>(encode_frame(&p)))
                .collect::<Vec<_>>(),
        );
        let stream = if hang {
            chunks.chain(futures::stream::pending()).boxed()
        } else {
            chunks.boxed()
        };
        FrameReader::new(stream, MAX_FRAME_LEN)
    }

    #[tokio::test(start_paused = true)]
    async fn test_applies_frames_and_reports_ready() {
        let author = Replica::new();
        let first = author.replace_text("hi").unwrap();
        let second = author.replace_text("hi there").unwrap();

        let transport = Arc::new(ScriptedTransport::default());
        transport
            .streams
            .lock()
            .push_back(reader_of(vec![first, second], true));

        let replica = Arc::new(Replica::new());
        let (events, mut events_rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_reader(
            replica.clone(),
            transport.clone(),
            Duration::from_secs(1),
            events,
            cancel.clone(),
        ));

        assert_eq!(events_rx.recv().await.unwrap(), SyncEvent::Ready);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(replica.text(), "hi there");

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(transport.opened.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_with_current_state_vector() {
        let author = Replica::new();
        let first = author.replace_text("one").unwrap();
        let second = author.replace_text("one two").unwrap();

        let transport = Arc::new(ScriptedTransport::default());
        transport
            .streams
            .lock()
            .extend([reader_of(vec![first], false), reader_of(vec![second], true)]);

        let replica = Arc::new(Replica::new());
        let (events, mut events_rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        tokio::spawn(run_reader(
            replica.clone(),
            transport.clone(),
            Duration::from_secs(1),
            events,
            cancel.clone(),
        ));

        assert_eq!(events_rx.recv().await.unwrap(), SyncEvent::Ready);
        assert_eq!(events_rx.recv().await.unwrap(), SyncEvent::Loading);
        assert_eq!(events_rx.recv().await.unwrap(), SyncEvent::Ready);
        assert_eq!(replica.text(), "one two");

        let opened = transport.opened.lock().clone();
        assert_eq!(opened.len(), 2);
        assert_ne!(opened[0], opened[1]);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_failed_connects() {
        let transport = Arc::new(ScriptedTransport::default());
        let (events, _events_rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        tokio::spawn(run_reader(
            Arc::new(Replica::new()),
            transport.clone(),
            Duration::from_secs(1),
            events,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(transport.opened.lock().len(), 3);

        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.opened.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_rebuilds_replica_from_service() {
        let service = Replica::new();
        let admitted = service.replace_text("abc").unwrap();

        let transport = Arc::new(ScriptedTransport::default());
        transport.streams.lock().extend([
            reader_of(vec![admitted.clone()], true),
            reader_of(vec![admitted], true),
        ]);

        let replica = Arc::new(Replica::new());
        let (events, mut events_rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        tokio::spawn(run_reader(
            replica.clone(),
            transport.clone(),
            Duration::from_secs(1),
            events.clone(),
            cancel.clone(),
        ));
        assert_eq!(events_rx.recv().await.unwrap(), SyncEvent::Ready);

        let stale_client = replica.client_id();
        replica.replace_text("abcdef").unwrap();
        events
            .send(SyncEvent::Rejected("too many changes".to_string()))
            .unwrap();

        assert!(matches!(events_rx.recv().await, Ok(SyncEvent::Rejected(_))));
        assert_eq!(events_rx.recv().await.unwrap(), SyncEvent::Loading);
        assert_eq!(events_rx.recv().await.unwrap(), SyncEvent::Ready);

        assert_eq!(replica.text(), "abc");
        assert_ne!(replica.client_id(), stale_client);
        let opened = transport.opened.lock().clone();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[1], crate::merge::empty_state_vector());
        cancel.cancel();
    }
}
