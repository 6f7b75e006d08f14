//! Server side: the authoritative document and its HTTP front.
//!
//! # Module Organization
//!
//! ```text
//! server/
//! ├── config   - ServerConfig and environment overrides
//! ├── validate - Structural admission checks and character accounting
//! ├── service  - Document-owning task, subscriber registry, fan-out
//! └── routes   - axum router: /stream, /note, /health
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use note_sync_http::server::{router, ServerConfig, SyncService};
//!
//! # async fn run() -> std::io::Result<()> {
//! let config = ServerConfig::default();
//! let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
//! let app = router(SyncService::spawn(config));
//! axum::serve(listener, app).await
//! # }
//! ```

pub mod config;
pub mod routes;
pub mod service;
pub mod validate;

pub use config::ServerConfig;
pub use routes::{router, FrameStreamResponse};
pub use service::{Snapshot, Subscription, SyncHandle, SyncService};
pub use validate::{check_integrity, validate};
