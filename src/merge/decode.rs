//! Structural decoder for v1-encoded document updates.
//!
//! The document engine merges and diffs updates as opaque blobs. Admission
//! needs to look inside them: which items an update carries, where each one
//! is anchored, and what kind of content it holds. This module walks the v1
//! binary layout with the engine's own [`DecoderV1`] and keeps the results as
//! plain Rust values without integrating anything into a document.
//!
//! ```text
//! update      := varuint(#clients) client_group* delete_set
//! client_group:= varuint(#structs) varuint(client) varuint(clock) struct*
//! struct      := u8(info) ( gc | skip | item )
//! delete_set  := varuint(#clients) ( varuint(client) varuint(#ranges) (varuint(clock) varuint(len))* )*
//! ```
//!
//! String lengths are reported in UTF-16 code units, the unit the engine
//! uses for item clocks.

use crate::error::{Result, SyncError};
use yrs::encoding::read::{Cursor, Read};
use yrs::updates::decoder::{Decoder, DecoderV1};

const BITS5: u8 = 0b0001_1111;
const BIT6: u8 = 0b0010_0000;
const BIT7: u8 = 0b0100_0000;
const BIT8: u8 = 0b1000_0000;

const REF_GC: u8 = 0;
const REF_DELETED: u8 = 1;
const REF_JSON: u8 = 2;
const REF_BINARY: u8 = 3;
const REF_STRING: u8 = 4;
const REF_EMBED: u8 = 5;
const REF_FORMAT: u8 = 6;
const REF_TYPE: u8 = 7;
const REF_ANY: u8 = 8;
const REF_DOC: u8 = 9;
const REF_SKIP: u8 = 10;

const TYPE_REF_XML_ELEMENT: u8 = 3;

/// Unique identifier of a single character/element: `(client, clock)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id {
    /// Replica that created the element
    pub client: u64,
    /// Per-client sequence number
    pub clock: u64,
}

impl Id {
    /// Create an id.
    pub fn new(client: u64, clock: u64) -> Self {
        Id { client, clock }
    }
}

impl From<yrs::ID> for Id {
    fn from(id: yrs::ID) -> Self {
        Id::new(id.client, u64::from(id.clock))
    }
}

/// Parent reference written for items that cannot inherit it from a neighbour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parent {
    /// A root-level container, addressed by name
    Named(String),
    /// A nested container, addressed by the id of the item that holds it
    Id(Id),
}

/// Payload of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Plain text
    String(String),
    /// Placeholder for content that has been garbage collected
    Deleted(u64),
    /// Legacy JSON values
    Json(u64),
    /// Binary blob
    Binary,
    /// Embedded object
    Embed,
    /// Formatting attribute
    Format(String),
    /// Nested shared type, tagged with its type ref
    Type(u64),
    /// Arbitrary encodable values
    Any(u64),
    /// Sub-document
    Doc,
}

impl Content {
    /// Number of clock ticks this content occupies.
    pub fn len(&self) -> u64 {
        match self {
            Content::String(s) => utf16_len(s),
            Content::Deleted(n) | Content::Json(n) | Content::Any(n) => *n,
            Content::Binary | Content::Embed | Content::Format(_) | Content::Type(_) | Content::Doc => 1,
        }
    }

    /// Whether this content occupies no clock ticks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the content kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Content::String(_) => "string",
            Content::Deleted(_) => "deleted",
            Content::Json(_) => "json",
            Content::Binary => "binary",
            Content::Embed => "embed",
            Content::Format(_) => "format",
            Content::Type(_) => "type",
            Content::Any(_) => "any",
            Content::Doc => "doc",
        }
    }
}

/// An inserted element (or run of characters) with its anchors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Id of the first element of the run
    pub id: Id,
    /// Left neighbour at insertion time
    pub origin: Option<Id>,
    /// Right neighbour at insertion time
    pub right_origin: Option<Id>,
    /// Explicit parent; absent when inherited from a neighbour
    pub parent: Option<Parent>,
    /// Map key, for items stored in a map-like container
    pub parent_sub: Option<String>,
    /// Payload
    pub content: Content,
}

impl Item {
    /// Number of clock ticks the item spans.
    pub fn len(&self) -> u64 {
        self.content.len()
    }

    /// Whether the item spans no clock ticks.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// One structural record of an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Struct {
    /// Garbage-collected range: deleted content whose item was dropped
    Gc {
        /// First id of the range
        id: Id,
        /// Range length
        len: u64,
    },
    /// Gap in a merged update; carries nothing
    Skip {
        /// First id of the gap
        id: Id,
        /// Gap length
        len: u64,
    },
    /// Inserted content
    Item(Item),
}

impl Struct {
    /// First id covered by this struct.
    pub fn id(&self) -> Id {
        match self {
            Struct::Gc { id, .. } | Struct::Skip { id, .. } => *id,
            Struct::Item(item) => item.id,
        }
    }

    /// Number of clock ticks covered.
    pub fn len(&self) -> u64 {
        match self {
            Struct::Gc { len, .. } | Struct::Skip { len, .. } => *len,
            Struct::Item(item) => item.len(),
        }
    }

    /// Whether this struct covers no clock ticks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A deleted clock range of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRange {
    /// Client whose elements were deleted
    pub client: u64,
    /// First deleted clock
    pub clock: u64,
    /// Number of deleted clocks
    pub len: u64,
}

impl DeleteRange {
    /// Number of clocks shared with `[clock, clock + len)` of `client`.
    pub fn overlap(&self, client: u64, clock: u64, len: u64) -> u64 {
        if self.client != client {
            return 0;
        }
        let start = self.clock.max(clock);
        let end = self.clock.saturating_add(self.len).min(clock.saturating_add(len));
        end.saturating_sub(start)
    }
}

/// The structural content of an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedUpdate {
    /// Structs in encoding order, grouped by client
    pub structs: Vec<Struct>,
    /// Tombstone ranges
    pub delete_set: Vec<DeleteRange>,
}

/// Decode a v1 update into its structs and delete set.
///
/// # Errors
///
/// Returns [`SyncError::MergeFailure`] on truncated input, malformed integers,
/// invalid UTF-8, or content kinds this decoder does not understand.
pub fn decode_update(bytes: &[u8]) -> Result<DecodedUpdate> {
    let mut decoder = DecoderV1::new(Cursor::new(bytes));
    let mut decoded = DecodedUpdate::default();

    let clients: u32 = decoder.read_var()?;
    for _ in 0..clients {
        let struct_count: u32 = decoder.read_var()?;
        let client = decoder.read_client()?;
        let mut clock: u32 = decoder.read_var()?;
        for _ in 0..struct_count {
            let record = read_struct(&mut decoder, Id::new(client, u64::from(clock)))?;
            let len = u32::try_from(record.len())
                .map_err(|_| SyncError::MergeFailure("struct length out of range".to_string()))?;
            clock = clock.saturating_add(len);
            decoded.structs.push(record);
        }
    }

    let ds_clients: u32 = decoder.read_var()?;
    for _ in 0..ds_clients {
        decoder.reset_ds_cur_val();
        let client = decoder.read_client()?;
        let ranges: u32 = decoder.read_var()?;
        for _ in 0..ranges {
            let clock = decoder.read_ds_clock()?;
            let len = decoder.read_ds_len()?;
            decoded.delete_set.push(DeleteRange {
                client,
                clock: u64::from(clock),
                len: u64::from(len),
            });
        }
    }

    Ok(decoded)
}

fn read_struct(decoder: &mut DecoderV1<'_>, id: Id) -> Result<Struct> {
    let info = decoder.read_info()?;
    match info & BITS5 {
        REF_GC => Ok(Struct::Gc {
            id,
            len: u64::from(decoder.read_len()?),
        }),
        REF_SKIP => Ok(Struct::Skip {
            id,
            len: u64::from(decoder.read_var::<u32>()?),
        }),
        content_ref => {
            let origin = if info & BIT8 != 0 {
                Some(Id::from(decoder.read_left_id()?))
            } else {
                None
            };
            let right_origin = if info & BIT7 != 0 {
                Some(Id::from(decoder.read_right_id()?))
            } else {
                None
            };
            let cant_copy_parent_info = info & (BIT7 | BIT8) == 0;
            let (parent, parent_sub) = if cant_copy_parent_info {
                let parent = if decoder.read_parent_info()? {
                    Parent::Named(read_str(decoder)?)
                } else {
                    Parent::Id(Id::from(decoder.read_left_id()?))
                };
                let parent_sub = if info & BIT6 != 0 {
                    Some(read_str(decoder)?)
                } else {
                    None
                };
                (Some(parent), parent_sub)
            } else {
                (None, None)
            };
            let content = read_content(decoder, content_ref)?;
            Ok(Struct::Item(Item {
                id,
                origin,
                right_origin,
                parent,
                parent_sub,
                content,
            }))
        }
    }
}

fn read_content(decoder: &mut DecoderV1<'_>, content_ref: u8) -> Result<Content> {
    match content_ref {
        REF_DELETED => Ok(Content::Deleted(u64::from(decoder.read_len()?))),
        REF_JSON => {
            let len = decoder.read_len()?;
            for _ in 0..len {
                decoder.read_buf()?;
            }
            Ok(Content::Json(u64::from(len)))
        }
        REF_BINARY => {
            decoder.read_buf()?;
            Ok(Content::Binary)
        }
        REF_STRING => Ok(Content::String(read_str(decoder)?)),
        REF_EMBED => {
            decoder.read_buf()?;
            Ok(Content::Embed)
        }
        REF_FORMAT => {
            let key = read_str(decoder)?;
            decoder.read_buf()?;
            Ok(Content::Format(key))
        }
        REF_TYPE => {
            let type_ref = decoder.read_type_ref()?;
            if type_ref == TYPE_REF_XML_ELEMENT {
                decoder.read_buf()?;
            }
            Ok(Content::Type(u64::from(type_ref)))
        }
        REF_ANY => {
            let len = decoder.read_len()?;
            for _ in 0..len {
                decoder.read_any()?;
            }
            Ok(Content::Any(u64::from(len)))
        }
        REF_DOC => {
            decoder.read_buf()?;
            decoder.read_any()?;
            Ok(Content::Doc)
        }
        other => Err(SyncError::MergeFailure(format!(
            "unsupported content ref {other}"
        ))),
    }
}

/// Read a length-prefixed string, rejecting invalid UTF-8.
fn read_str(decoder: &mut DecoderV1<'_>) -> Result<String> {
    let bytes = decoder.read_buf()?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| SyncError::MergeFailure(format!("invalid utf-8 in update: {e}")))
}

/// Length of `s` in UTF-16 code units.
pub fn utf16_len(s: &str) -> u64 {
    s.encode_utf16().count() as u64
}
