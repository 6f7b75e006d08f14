//! Length-prefixed frame codec.
//!
//! Every frame on the wire is an 8-byte little-endian payload length followed
//! by the payload itself:
//!
//! ```text
//! +----------------------+-------------------------+
//! | length: u64 (LE)     | payload: length bytes   |
//! +----------------------+-------------------------+
//! ```
//!
//! Network streams deliver bytes in chunks that have nothing to do with frame
//! boundaries, so decoding is incremental. [`FrameDecoder`] accumulates bytes
//! and yields complete payloads; whatever is left over stays buffered for the
//! next call. [`read_frame`] drives a decoder from an async byte stream.
//!
//! # Examples
//!
//! ```
//! use note_sync_http::protocol::{encode_frame, FrameDecoder};
//!
//! let wire = encode_frame(b"hello");
//! let mut decoder = FrameDecoder::new();
//! let frames = decoder.feed(&wire).unwrap();
//! assert_eq!(&frames[0][..], b"hello");
//! assert!(decoder.remainder().is_empty());
//! ```

use super::constants::{FRAME_HEADER_LEN, MAX_FRAME_LEN};
use crate::error::{Result, SyncError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt::Display;

/// Prepend the 8-byte little-endian length header to `payload`.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u64_le(payload.len() as u64);
    frame.extend_from_slice(payload);
    frame.freeze()
}

/// Decoder position within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Fewer than 8 header bytes are buffered
    WaitingForHeader,
    /// Header decoded, waiting for this many payload bytes
    WaitingForPayload(usize),
}

/// Incremental frame decoder.
///
/// Restartable across arbitrary chunk boundaries: feeding a byte stream in any
/// split yields the same payloads as feeding it whole.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: ParseState,
    max_len: u64,
}

impl FrameDecoder {
    /// Create a decoder with the default 1 MiB ceiling.
    pub fn new() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }

    /// Create a decoder that rejects frames declaring more than `max_len` bytes.
    pub fn with_max_len(max_len: u64) -> Self {
        FrameDecoder {
            buffer: BytesMut::with_capacity(8192),
            state: ParseState::WaitingForHeader,
            max_len,
        }
    }

    /// Resume decoding from bytes left over by a previous decoder.
    pub fn from_remainder(remainder: BytesMut, max_len: u64) -> Self {
        FrameDecoder {
            buffer: remainder,
            state: ParseState::WaitingForHeader,
            max_len,
        }
    }

    /// Buffer `data` and return every frame it completes.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.decode()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to take one complete frame out of the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                ParseState::WaitingForHeader => {
                    if self.buffer.len() < FRAME_HEADER_LEN {
                        return Ok(None);
                    }
                    let mut header = [0u8; FRAME_HEADER_LEN];
                    header.copy_from_slice(&self.buffer[..FRAME_HEADER_LEN]);
                    let len = u64::from_le_bytes(header);
                    if len > self.max_len {
                        return Err(SyncError::FrameTooLarge {
                            len,
                            max: self.max_len,
                        });
                    }
                    self.buffer.advance(FRAME_HEADER_LEN);
                    // bounded by max_len above
                    self.state = ParseState::WaitingForPayload(len as usize);
                }
                ParseState::WaitingForPayload(len) => {
                    if self.buffer.len() < len {
                        self.buffer.reserve(len - self.buffer.len());
                        return Ok(None);
                    }
                    let payload = self.buffer.split_to(len).freeze();
                    self.state = ParseState::WaitingForHeader;
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Current parse state.
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Bytes buffered beyond the last decoded frame.
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    /// Give back the unconsumed bytes.
    ///
    /// Only meaningful between frames; a partially consumed header is lost otherwise.
    pub fn into_remainder(self) -> BytesMut {
        self.buffer
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read one frame from `stream`, starting with the `leftover` bytes of a previous call.
///
/// Returns the payload and the bytes buffered past it, to be passed to the
/// next call.
///
/// # Errors
///
/// - [`SyncError::FrameTooLarge`] if the header declares more than `max_len` bytes
/// - [`SyncError::PrematureClose`] if the stream ends mid-frame
/// - [`SyncError::Http`] if the underlying stream yields an error
pub async fn read_frame<S, E>(
    stream: &mut S,
    leftover: BytesMut,
    max_len: u64,
) -> Result<(Bytes, BytesMut)>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut decoder = FrameDecoder::from_remainder(leftover, max_len);
    loop {
        if let Some(payload) = decoder.decode()? {
            return Ok((payload, decoder.into_remainder()));
        }
        match stream.next().await {
            Some(Ok(chunk)) => decoder.buffer.extend_from_slice(&chunk),
            Some(Err(e)) => return Err(SyncError::Http(e.to_string())),
            None => return Err(SyncError::PrematureClose),
        }
    }
}
