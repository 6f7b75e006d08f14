//! Structural admission checks for updates.
//!
//! A legal update may only extend the one sanctioned text sequence. For every
//! item it carries:
//!
//! 1. the content must be a plain string, otherwise [`SyncError::InvalidContent`];
//! 2. the anchor must be one of
//!    - no explicit parent, chained to an existing neighbour, or
//!    - parent is the `"text"` container and no left origin (the first item
//!      placed directly under the container),
//!
//!    otherwise [`SyncError::InvalidAnchor`].
//!
//! The validator also counts characters so the service can enforce the
//! document budget. It runs on the raw update and again on the merged
//! candidate document, since a merge can change what an update resolves to.
//!
//! The merged candidate additionally goes through [`check_integrity`]: every
//! client's clocks must run without gaps from zero, and every origin must name
//! an id the candidate holds. Items failing either test would stay pending on
//! every replica forever.

use crate::error::{Result, SyncError};
use crate::merge::decode::{Content, DecodedUpdate, DeleteRange, Id, Item, Parent, Struct};
use crate::types::Stats;
use std::collections::HashMap;

/// Validate every struct of `update` and accumulate its character totals.
///
/// # Errors
///
/// The first offending item determines the error.
pub fn validate(update: &DecodedUpdate, text_name: &str) -> Result<Stats> {
    let mut stats = Stats::default();

    for record in &update.structs {
        match record {
            Struct::Gc { len, .. } => {
                stats.inserted_chars += len;
                stats.deleted_chars += len;
            }
            Struct::Skip { .. } => {}
            Struct::Item(item) => {
                check_content(item)?;
                check_anchor(item, text_name)?;
                stats.inserted_chars += item.len();
                stats.deleted_chars += deleted_within(item, &update.delete_set);
            }
        }
    }

    Ok(stats)
}

/// Check that a whole-document update integrates completely.
///
/// # Errors
///
/// [`SyncError::InvalidAnchor`] for the first gap in a client's clocks or the
/// first origin pointing outside the update.
pub fn check_integrity(update: &DecodedUpdate) -> Result<()> {
    let mut ends: HashMap<u64, u64> = HashMap::new();

    for record in &update.structs {
        let id = record.id();
        let end = ends.entry(id.client).or_default();
        if matches!(record, Struct::Skip { .. }) || id.clock != *end {
            return Err(SyncError::InvalidAnchor(format!(
                "client {} is missing clocks from {}",
                id.client, *end
            )));
        }
        *end = id.clock.saturating_add(record.len());
    }

    let known = |id: &Id| ends.get(&id.client).is_some_and(|end| id.clock < *end);
    for record in &update.structs {
        let Struct::Item(item) = record else { continue };
        let dangling = item
            .origin
            .iter()
            .chain(item.right_origin.iter())
            .copied()
            .find(|id| !known(id));
        if let Some(origin) = dangling {
            return Err(SyncError::InvalidAnchor(format!(
                "item {}:{} references missing {}:{}",
                item.id.client, item.id.clock, origin.client, origin.clock
            )));
        }
    }

    Ok(())
}

fn check_content(item: &Item) -> Result<()> {
    match &item.content {
        Content::String(_) => Ok(()),
        other => Err(SyncError::InvalidContent(format!(
            "item {}:{} carries {} content",
            item.id.client,
            item.id.clock,
            other.kind()
        ))),
    }
}

fn check_anchor(item: &Item, text_name: &str) -> Result<()> {
    // a right origin alone also places the item inside an existing sequence
    let chained = item.origin.is_some() || item.right_origin.is_some();

    let legal = match (&item.parent, &item.parent_sub) {
        (None, None) => chained,
        (Some(Parent::Named(name)), None) => name == text_name && item.origin.is_none(),
        _ => false,
    };

    if legal {
        return Ok(());
    }

    let reason = match (&item.parent, &item.parent_sub) {
        (_, Some(key)) => format!("keyed entry {key:?}"),
        (Some(Parent::Named(name)), _) if name != text_name => {
            format!("root container {name:?}")
        }
        (Some(Parent::Named(_)), _) => "root-level item with a left origin".to_string(),
        (Some(Parent::Id(id)), _) => format!("nested parent {}:{}", id.client, id.clock),
        (None, _) => "unanchored item".to_string(),
    };
    Err(SyncError::InvalidAnchor(format!(
        "item {}:{}: {reason}",
        item.id.client, item.id.clock
    )))
}

fn deleted_within(item: &Item, delete_set: &[DeleteRange]) -> u64 {
    delete_set
        .iter()
        .map(|range| range.overlap(item.id.client, item.id.clock, item.len()))
        .sum()
}
