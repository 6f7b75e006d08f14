//! Update encoding, merging and inspection.
//!
//! The document is a Yjs-compatible CRDT. Two layers live here:
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | Opaque byte-level operations backed by `yrs`: merge, diff, state vectors |
//! | [`decode`] | Structural read of a v1 update blob, used to validate what an update does |
//!
//! Neither layer materializes a live document on the server side; the
//! authoritative state is always kept as one merged update.
//!
//! # Examples
//!
//! ```
//! use note_sync_http::merge::{empty_state_vector, empty_update, diff_update, merge_updates};
//!
//! let merged = merge_updates(&[&empty_update()[..], &empty_update()[..]]).unwrap();
//! let delta = diff_update(&merged, &empty_state_vector()).unwrap();
//! assert!(!delta.is_empty());
//! ```

pub mod decode;
pub mod engine;

pub use decode::{decode_update, Content, DecodedUpdate, DeleteRange, Id, Item, Parent, Struct};
pub use engine::{check_state_vector, diff_update, empty_state_vector, empty_update, merge_updates};
