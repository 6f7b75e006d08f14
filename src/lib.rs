#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # Note Sync: delta synchronization of one shared note
//!
//! Many clients edit one plain-text note concurrently. Each client keeps a
//! CRDT replica of the note (Yjs-compatible, via `yrs`), sends its local
//! changes to the service as merged delta updates, and receives everyone
//! else's changes over a long-lived framed stream.
//!
//! ## Overview
//!
//! ```text
//!  NoteSession ──POST /note (update)───────────▶ routes ──▶ SyncService
//!   ├ Replica                                              ├ validate
//!   ├ coalescer                                            ├ merge + budget
//!   └ reader ◀──POST /stream (state vector)── frames ◀──── └ fan-out diffs
//! ```
//!
//! The service admits an update only if every item it carries is plain text
//! anchored inside the single `"text"` sequence, and only if the merged note
//! stays within its length budget (2000 UTF-16 units by default).
//!
//! ## Key Features
//!
//! - **Framed push stream**: 8-byte little-endian length prefix, 1 MiB ceiling
//! - **Structural admission**: content and anchor checks on the raw update
//!   and again on the merged document
//! - **Cumulative catch-up**: every push is a diff against the state vector
//!   the subscriber connected with
//! - **Client batching**: 300 ms debounce, retries only transient failures,
//!   rejections surfaced as events
//! - **Reconnect**: the reader reopens the stream after 1 s with its current
//!   state vector
//!
//! ## Client Usage
//!
//! ```ignore
//! use note_sync_http::{ClientConfig, NoteSession, SyncEvent};
//!
//! #[tokio::main]
//! async fn main() -> note_sync_http::Result<()> {
//!     let session = NoteSession::connect(ClientConfig::new("http://127.0.0.1:3000"))?;
//!     let mut events = session.events();
//!
//!     session.set_text("groceries: milk");
//!     while let Ok(event) = events.recv().await {
//!         if let SyncEvent::Rejected(reason) = event {
//!             eprintln!("edit refused: {reason}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Server Usage
//!
//! ```ignore
//! use note_sync_http::{router, ServerConfig, SyncService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.unwrap();
//!     let app = router(SyncService::spawn(config));
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Module Structure
//!
//! - **[types]** - Shared value types (Origin, Stats, TextEdit, Admission, ...)
//! - **[error]** - Error type and result alias
//! - **[protocol]** - Constants and the frame codec
//! - **[merge]** - Document engine adapter and update decoder
//! - **[server]** - Validator, synchronization service and axum routes
//! - **[client]** - Replica, diffing, transport, coalescer, reader, session

pub mod client;
pub mod error;
pub mod merge;
pub mod protocol;
pub mod server;
pub mod types;

pub use client::{ClientConfig, NoteSession, Replica, SyncClient, SyncTransport};
pub use error::{Result, SyncError};
pub use protocol::{encode_frame, read_frame, FrameDecoder};
pub use server::{router, ServerConfig, SyncHandle, SyncService};
pub use types::{Admission, NoteResponse, Origin, Stats, SyncEvent, TextEdit, UpdateEvent};
