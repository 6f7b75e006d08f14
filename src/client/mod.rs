//! Client side: local replica, edit diffing and the session tasks.
//!
//! # Module Organization
//!
//! ```text
//! client/
//! ├── config    - ClientConfig timings and base URL
//! ├── diff      - Whole-string to positional edit conversion
//! ├── replica   - Local yrs document with origin-tagged change events
//! ├── fetch     - SyncTransport seam and the reqwest SyncClient
//! ├── coalescer - Debounced batching and submission of local updates
//! ├── reader    - Persistent catch-up stream with reconnect
//! └── session   - NoteSession tying the pieces together
//! ```
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`NoteSession`] | One synchronized editing session |
//! | [`Replica`] | Local copy of the shared document |
//! | [`SyncClient`] | HTTP transport to `/stream` and `/note` |
//! | [`Coalescer`] | Ordered buffer of pending local updates |
//! | [`ClientConfig`] | Timing and addressing options |
//!
//! # Examples
//!
//! ```
//! use note_sync_http::client::{diff, Replica};
//!
//! let replica = Replica::new();
//! replica.replace_text("hello");
//!
//! let edit = diff(&replica.text(), "hello world");
//! assert!(replica.apply_edit(&edit).is_some());
//! assert_eq!(replica.text(), "hello world");
//! ```

pub mod coalescer;
pub mod config;
pub mod diff;
pub mod fetch;
pub mod reader;
pub mod replica;
pub mod session;

pub use coalescer::{run_coalescer, Coalescer};
pub use config::ClientConfig;
pub use diff::{apply, diff};
pub use fetch::{FrameReader, SyncClient, SyncTransport};
pub use reader::run_reader;
pub use replica::Replica;
pub use session::NoteSession;
