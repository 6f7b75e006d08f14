//! Thin adapter over the `yrs` document engine.
//!
//! The service never holds a live `yrs::Doc`; the authoritative document is
//! kept as one merged v1 update, and every engine operation it needs works on
//! encoded bytes. All engine errors surface as [`SyncError::MergeFailure`].

use crate::error::{Result, SyncError};
use bytes::Bytes;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact};

/// The v1 encoding of a document with no content.
pub fn empty_update() -> Bytes {
    let doc = Doc::new();
    let update = doc
        .transact()
        .encode_state_as_update_v1(&StateVector::default());
    Bytes::from(update)
}

/// The v1 encoding of a state vector that has seen nothing.
pub fn empty_state_vector() -> Bytes {
    Bytes::from(StateVector::default().encode_v1())
}

/// Merge several updates into one equivalent update.
///
/// Merging is commutative and idempotent.
pub fn merge_updates(updates: &[&[u8]]) -> Result<Bytes> {
    yrs::merge_updates_v1(updates)
        .map(Bytes::from)
        .map_err(|e| SyncError::MergeFailure(e.to_string()))
}

/// The part of `update` not yet covered by `state_vector`.
pub fn diff_update(update: &[u8], state_vector: &[u8]) -> Result<Bytes> {
    yrs::diff_updates_v1(update, state_vector)
        .map(Bytes::from)
        .map_err(|e| SyncError::MergeFailure(e.to_string()))
}

/// Check that `bytes` is a well-formed v1 state vector.
pub fn check_state_vector(bytes: &[u8]) -> Result<()> {
    StateVector::decode_v1(bytes)?;
    Ok(())
}
