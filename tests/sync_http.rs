use bytes::Bytes;
use futures::StreamExt;
use note_sync_http::client::{ClientConfig, NoteSession, Replica, SyncClient, SyncTransport};
use note_sync_http::merge::empty_state_vector;
use note_sync_http::{router, Admission, Origin, ServerConfig, SyncEvent, SyncService};
use std::time::Duration;

async fn spawn_server(config: ServerConfig) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(SyncService::spawn(config));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn fast_config(base_url: &str) -> ClientConfig {
    ClientConfig::new(base_url)
        .with_debounce_ms(20)
        .with_reconnect_delay_ms(50)
        .with_request_timeout_ms(2_000)
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_ready(events: &mut tokio::sync::broadcast::Receiver<SyncEvent>) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if events.recv().await.unwrap() == SyncEvent::Ready {
                return;
            }
        }
    })
    .await
    .expect("session became ready");
}

#[tokio::test]
async fn two_sessions_converge() {
    let base = spawn_server(ServerConfig::default()).await;

    let alice = NoteSession::connect(fast_config(&base)).unwrap();
    let bob = NoteSession::connect(fast_config(&base)).unwrap();
    let (mut alice_events, mut bob_events) = (alice.events(), bob.events());
    wait_ready(&mut alice_events).await;
    wait_ready(&mut bob_events).await;

    alice.set_text("milk");
    eventually("bob to see alice", || bob.text() == "milk").await;

    bob.set_text("milk, eggs");
    alice.set_text("buy milk");
    eventually("sessions to converge", || {
        let a = alice.text();
        a == bob.text() && a.contains("buy") && a.contains("eggs")
    })
    .await;
    assert_eq!(alice.text(), "buy milk, eggs");

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn concurrent_inserts_at_head_converge() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = SyncClient::new(ClientConfig::new(&base)).unwrap();

    let left = Replica::new();
    let right = Replica::new();
    let from_left = left.replace_text("left").unwrap();
    let from_right = right.replace_text("right").unwrap();

    let (a, b) = tokio::join!(client.submit(from_left), client.submit(from_right));
    assert_eq!(a, Admission::Accepted);
    assert_eq!(b, Admission::Accepted);

    let session = NoteSession::connect(fast_config(&base)).unwrap();
    wait_ready(&mut session.events()).await;

    let mut frames = client.open_stream(empty_state_vector()).await.unwrap();
    let catch_up = frames.next_frame().await.unwrap();
    let fresh = Replica::new();
    fresh.apply_update(&catch_up, Origin::Remote).unwrap();

    assert_eq!(fresh.text().len(), "leftright".len());
    assert_eq!(session.text(), fresh.text());
    session.close().await;
}

#[tokio::test]
async fn over_budget_edit_is_rejected_and_not_applied() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = SyncClient::new(ClientConfig::new(&base)).unwrap();

    let author = Replica::new();
    let full = "x".repeat(1999);
    assert_eq!(
        client.submit(author.replace_text(&full).unwrap()).await,
        Admission::Accepted
    );

    let over = author.replace_text(&format!("{full}yz")).unwrap();
    match client.submit(over).await {
        Admission::Rejected(reason) => assert!(reason.contains("too many changes"), "{reason}"),
        other => panic!("expected rejection, got {other:?}"),
    }

    let mut frames = client.open_stream(empty_state_vector()).await.unwrap();
    let reader = Replica::new();
    reader
        .apply_update(&frames.next_frame().await.unwrap(), Origin::Remote)
        .unwrap();
    assert_eq!(reader.text(), full);
}

#[tokio::test]
async fn session_surfaces_rejection() {
    let base = spawn_server(ServerConfig::default().with_max_document_len(5)).await;
    let session = NoteSession::connect(fast_config(&base)).unwrap();
    let mut events = session.events();
    wait_ready(&mut events).await;

    session.set_text("way too long");
    let reason = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let SyncEvent::Rejected(reason) = events.recv().await.unwrap() {
                return reason;
            }
        }
    })
    .await
    .unwrap();
    assert!(reason.contains("too many changes"));
    session.close().await;
}

#[tokio::test]
async fn session_resyncs_after_rejection() {
    let base = spawn_server(ServerConfig::default().with_max_document_len(5)).await;
    let author = NoteSession::connect(fast_config(&base)).unwrap();
    let watcher = NoteSession::connect(fast_config(&base)).unwrap();
    let (mut author_events, mut watcher_events) = (author.events(), watcher.events());
    wait_ready(&mut author_events).await;
    wait_ready(&mut watcher_events).await;

    author.set_text("abc");
    eventually("watcher to see abc", || watcher.text() == "abc").await;

    author.set_text("abcdef");
    eventually("author to drop refused text", || author.text() == "abc").await;

    author.set_text("abcZ");
    eventually("watcher to see the next edit", || watcher.text() == "abcZ").await;
    assert_eq!(author.text(), "abcZ");

    author.close().await;
    watcher.close().await;
}

#[tokio::test]
async fn stale_subscriber_catches_up() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = SyncClient::new(ClientConfig::new(&base)).unwrap();
    client
        .submit(Replica::new().replace_text("hello").unwrap())
        .await;

    let reader = Replica::new();
    let mut frames = client.open_stream(reader.state_vector()).await.unwrap();
    reader
        .apply_update(&frames.next_frame().await.unwrap(), Origin::Remote)
        .unwrap();
    assert_eq!(reader.text(), "hello");
}

#[tokio::test]
async fn stream_rejects_malformed_state_vector() {
    let base = spawn_server(ServerConfig::default()).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/stream"))
        .body(vec![0xffu8, 0xff])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stream_body_is_framed() {
    let base = spawn_server(ServerConfig::default()).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/stream"))
        .body(empty_state_vector())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let mut body = response.bytes_stream();
    let mut received = Vec::new();
    while received.len() < 8 {
        let chunk: Bytes = body.next().await.unwrap().unwrap();
        received.extend_from_slice(&chunk);
    }
    let declared = u64::from_le_bytes(received[..8].try_into().unwrap());
    assert!(declared > 0);
}
