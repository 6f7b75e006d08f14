//! Wire protocol: constants and the length-prefixed frame codec.
//!
//! Both directions of the protocol are plain HTTP `POST`s:
//!
//! | Route | Request body | Response |
//! |-------|--------------|----------|
//! | `/stream` | raw state vector | endless stream of frames |
//! | `/note` | raw update blob | JSON `{"ok": true}` or `{"ok": false, "error": ...}` |
//!
//! Only the `/stream` response is framed; see [`frame`] for the layout.

pub mod frame;

pub use frame::{encode_frame, read_frame, FrameDecoder, ParseState};

/// Protocol constants.
pub mod constants {
    /// Size of the frame length header in bytes.
    pub const FRAME_HEADER_LEN: usize = 8;

    /// Largest payload a frame may declare (1 MiB).
    pub const MAX_FRAME_LEN: u64 = 1024 * 1024;

    /// Name of the single text container every document holds.
    pub const TEXT_NAME: &str = "text";

    /// Default live-length budget of the shared document, in UTF-16 units.
    pub const MAX_DOCUMENT_LEN: u64 = 2000;

    /// Content type of the frame stream.
    pub const STREAM_CONTENT_TYPE: &str = "text/event-stream";

    /// HTTP routes.
    pub mod routes {
        /// Subscribe to the document: state vector in, frames out.
        pub const STREAM: &str = "/stream";
        /// Submit an update blob.
        pub const NOTE: &str = "/note";
        /// Liveness probe.
        pub const HEALTH: &str = "/health";
    }
}
