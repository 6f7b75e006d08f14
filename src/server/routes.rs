//! HTTP front of the synchronization service.
//!
//! | Route | Request body | Response |
//! |-------|--------------|----------|
//! | `POST /stream` | encoded state vector | `200`, endless framed body of update payloads |
//! | `POST /note` | encoded update | `200` with `{"ok": true}` or `{"ok": false, "error": ...}` |
//! | `GET /health` | none | `200` with the document length and subscriber count |
//!
//! A malformed state vector on `/stream` is answered with `400`. A submission
//! the service could not process at all (service gone) is answered with `503`,
//! which clients treat as a transient failure; content rejections are a
//! normal `200` response with `ok: false`.

use super::service::{Subscription, SyncHandle};
use crate::error::SyncError;
use crate::protocol::constants::{routes, STREAM_CONTENT_TYPE};
use crate::protocol::encode_frame;
use crate::types::NoteResponse;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use tower_http::trace::TraceLayer;

/// Build the router serving the service behind `handle`.
pub fn router(handle: SyncHandle) -> Router {
    Router::new()
        .route(routes::STREAM, post(open_stream))
        .route(routes::NOTE, post(submit_note))
        .route(routes::HEALTH, get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

async fn open_stream(State(handle): State<SyncHandle>, body: Bytes) -> Response {
    match handle.subscribe(body).await {
        Ok(subscription) => FrameStreamResponse::new(subscription).into_response(),
        Err(SyncError::MergeFailure(reason)) => {
            tracing::warn!(%reason, "rejected malformed state vector");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid state vector: {reason}") })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to open stream");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn submit_note(State(handle): State<SyncHandle>, body: Bytes) -> Response {
    let bytes = body.len();
    match handle.submit(body).await {
        Ok(stats) => {
            tracing::debug!(bytes, len = stats.net_len(), "note update accepted");
            Json(NoteResponse::accepted()).into_response()
        }
        Err(e) if e.is_rejection() => {
            tracing::info!(bytes, reason = %e, "note update rejected");
            Json(NoteResponse::rejected(e.to_string())).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "note update not processed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(NoteResponse::rejected(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn health(State(handle): State<SyncHandle>) -> Response {
    match handle.snapshot().await {
        Ok(snapshot) => Json(json!({
            "status": "ok",
            "len": snapshot.len,
            "subscribers": snapshot.subscribers,
        }))
        .into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Streaming response writing each payload of a [`Subscription`] as a frame.
///
/// The body never ends on its own; dropping it (client disconnect) drops the
/// subscription, which unregisters it from the service.
pub struct FrameStreamResponse {
    subscription: Subscription,
}

impl FrameStreamResponse {
    /// Wrap a subscription.
    pub fn new(subscription: Subscription) -> Self {
        FrameStreamResponse { subscription }
    }
}

impl IntoResponse for FrameStreamResponse {
    fn into_response(self) -> Response {
        let id = self.subscription.id();
        tracing::debug!(%id, "streaming frames");
        let stream = self
            .subscription
            .map(|payload| Ok::<_, Infallible>(encode_frame(&payload)));

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Replica;
    use crate::merge::empty_state_vector;
    use crate::protocol::FrameDecoder;
    use crate::server::{ServerConfig, SyncService};
    use crate::types::Origin;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        router(SyncService::spawn(ServerConfig::default()))
    }

    fn post_bytes(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(body.into())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_note_accepts_valid_update() {
        let app = app();
        let update = Replica::new().replace_text("hello").unwrap();

        let response = app.oneshot(post_bytes("/note", update)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_note_rejects_garbage_with_ok_false() {
        let app = app();
        let response = app
            .oneshot(post_bytes("/note", vec![0xffu8, 0xff, 0xff]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["ok"], false);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_stream_rejects_bad_state_vector() {
        let app = app();
        let response = app
            .oneshot(post_bytes("/stream", vec![0xffu8]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stream_first_frame_is_catch_up() {
        let handle = SyncService::spawn(ServerConfig::default());
        handle
            .submit(Replica::new().replace_text("hello").unwrap())
            .await
            .unwrap();

        let response = router(handle)
            .oneshot(post_bytes("/stream", empty_state_vector()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            STREAM_CONTENT_TYPE
        );

        let mut body = response.into_body().into_data_stream();
        let mut decoder = FrameDecoder::new();
        let payload = loop {
            let chunk = body.next().await.unwrap().unwrap();
            if let Some(payload) = decoder.feed(&chunk).unwrap().into_iter().next() {
                break payload;
            }
        };

        let replica = Replica::new();
        replica.apply_update(&payload, Origin::Remote).unwrap();
        assert_eq!(replica.text(), "hello");
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["len"], 0);
        assert_eq!(body["subscribers"], 0);
    }
}
