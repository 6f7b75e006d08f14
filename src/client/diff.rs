//! Whole-string to positional edit conversion.
//!
//! Text inputs report edits as "the value is now X". The replica needs a
//! positional insert/delete, so [`diff`] strips the longest common prefix and
//! the longest common suffix (never overlapping the prefix) and reports what
//! lies between. This is not a minimal edit-distance diff: for repetitive
//! text several shorter edits may exist, but this one is deterministic and
//! linear.
//!
//! Matching happens on whole characters so a surrogate pair is never split,
//! and the resulting offsets are expressed in UTF-16 code units, the unit the
//! document engine addresses.
//!
//! ```
//! use note_sync_http::client::diff;
//!
//! let edit = diff("hello world", "hello brave world");
//! assert_eq!(edit.start, 6);
//! assert_eq!(edit.delete_count, 0);
//! assert_eq!(edit.inserted, "brave ");
//! ```

use crate::types::TextEdit;

/// Compute the common-prefix/common-suffix edit turning `previous` into `current`.
pub fn diff(previous: &str, current: &str) -> TextEdit {
    let prefix: usize = previous
        .chars()
        .zip(current.chars())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a.len_utf8())
        .sum();

    let old_rest = &previous[prefix..];
    let new_rest = &current[prefix..];

    let suffix: usize = old_rest
        .chars()
        .rev()
        .zip(new_rest.chars().rev())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a.len_utf8())
        .sum();

    let deleted = &old_rest[..old_rest.len() - suffix];
    let inserted = &new_rest[..new_rest.len() - suffix];

    TextEdit {
        start: utf16_units(&previous[..prefix]),
        delete_count: utf16_units(deleted),
        inserted: inserted.to_string(),
    }
}

/// Apply `edit` to `text`, the inverse of [`diff`].
///
/// Offsets falling inside a character or past the end are clamped to the
/// nearest preceding character boundary.
pub fn apply(text: &str, edit: &TextEdit) -> String {
    let start = byte_offset(text, edit.start as usize);
    let end = start + byte_offset(&text[start..], edit.delete_count as usize);

    let mut out = String::with_capacity(text.len() - (end - start) + edit.inserted.len());
    out.push_str(&text[..start]);
    out.push_str(&edit.inserted);
    out.push_str(&text[end..]);
    out
}

fn utf16_units(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

/// Byte offset of the character boundary reached after `units` UTF-16 units.
fn byte_offset(s: &str, units: usize) -> usize {
    let mut seen = 0;
    for (idx, ch) in s.char_indices() {
        if seen + ch.len_utf16() > units {
            return idx;
        }
        seen += ch.len_utf16();
    }
    s.len()
}
