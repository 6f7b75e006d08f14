//! Core types shared by the client and the server.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Origin`] | Whether an update was produced locally or received from the service |
//! | [`UpdateEvent`] | Change notification emitted by a replica |
//! | [`Stats`] | Character accounting produced by the validator |
//! | [`TextEdit`] | Positional edit produced by the text diff engine |
//! | [`NoteResponse`] | JSON body of `POST /note` |
//! | [`Admission`] | Client-side classification of a submit attempt |
//! | [`SyncEvent`] | Status notifications surfaced to the editing UI |

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an update came from.
///
/// Only [`Origin::Local`] updates are forwarded to the service; remote ones
/// have already been admitted there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Produced by an edit on this replica
    Local,
    /// Received from the service and applied to this replica
    Remote,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Remote => write!(f, "remote"),
        }
    }
}

/// A change notification: the encoded update plus its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    /// Encoded v1 update blob
    pub update: Bytes,
    /// Origin of the change
    pub origin: Origin,
}

/// Character totals accumulated while validating an update.
///
/// All counts are in UTF-16 code units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Characters carried by string items (plus tombstoned structs)
    pub inserted_chars: u64,
    /// Characters removed by the delete set (plus tombstoned structs)
    pub deleted_chars: u64,
}

impl Stats {
    /// Live character count implied by these totals.
    #[inline]
    pub fn net_len(&self) -> u64 {
        self.inserted_chars.saturating_sub(self.deleted_chars)
    }
}

/// A single positional replacement: delete `delete_count` units at `start`,
/// then insert `inserted` at `start`.
///
/// Offsets are UTF-16 code units, the unit the document engine addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextEdit {
    /// Offset of the first changed unit
    pub start: u32,
    /// Number of units removed
    pub delete_count: u32,
    /// Replacement text
    pub inserted: String,
}

impl TextEdit {
    /// Whether applying this edit changes nothing.
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.delete_count == 0 && self.inserted.is_empty()
    }
}

/// JSON body returned by `POST /note`.
///
/// Admissions and rejections both arrive with status 200; callers inspect `ok`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteResponse {
    /// Whether the update was admitted
    pub ok: bool,
    /// Rejection reason when `ok` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NoteResponse {
    /// An acknowledgement.
    pub fn accepted() -> Self {
        NoteResponse { ok: true, error: None }
    }

    /// A rejection carrying `reason`.
    pub fn rejected(reason: impl Into<String>) -> Self {
        NoteResponse {
            ok: false,
            error: Some(reason.into()),
        }
    }
}

/// Outcome of one attempt to submit an update, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The service merged the update
    Accepted,
    /// The service refused the update for cause; retrying will not help
    Rejected(String),
    /// The attempt failed in transit; the same blob should be retried
    TransientFailure(String),
}

impl From<NoteResponse> for Admission {
    fn from(response: NoteResponse) -> Self {
        if response.ok {
            Admission::Accepted
        } else {
            Admission::Rejected(response.error.unwrap_or_else(|| "rejected".to_string()))
        }
    }
}

/// Status notifications a session surfaces to its editing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The first frame of a connection was applied
    Ready,
    /// The stream failed and a reconnect is pending
    Loading,
    /// A local edit was refused by the service
    Rejected(String),
}
