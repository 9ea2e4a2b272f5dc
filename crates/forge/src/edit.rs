//! Byte-range text edits.
//!
//! Edits are applied **bottom-to-top** (descending `start`) so earlier
//! offsets stay valid after each splice. Offsets are snapped outward to
//! UTF-8 character boundaries before splicing.

use serde::Serialize;

use crate::ForgeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextEdit {
    pub start: usize,
    /// `start == end` is a pure insertion.
    pub end: usize,
    pub replacement: String,
}

impl TextEdit {
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            replacement: text.into(),
        }
    }

    pub fn replace(start: usize, end: usize, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            replacement: text.into(),
        }
    }
}

/// Splices `edits` into `text`.
///
/// # Errors
/// - `EditOutOfBounds` if an edit ends past the text or starts after it ends.
/// - `OverlappingEdits` if two edits cover a common byte. Two insertions at
///   the same offset are allowed and keep their given order.
pub fn apply_edits(text: &str, edits: &[TextEdit]) -> Result<String, ForgeError> {
    let mut ordered: Vec<(usize, &TextEdit)> = edits.iter().enumerate().collect();
    // Sort DESCENDING by start. At equal starts, replacements go before
    // insertions, and later-given insertions before earlier ones, so the
    // final text keeps the given order.
    ordered.sort_by(|(ia, a), (ib, b)| {
        b.start
            .cmp(&a.start)
            .then((a.start == a.end).cmp(&(b.start == b.end)))
            .then(ib.cmp(ia))
    });

    let mut out = text.to_string();
    let mut floor = usize::MAX;
    for (_, edit) in ordered {
        if edit.start > edit.end || edit.end > text.len() {
            return Err(ForgeError::EditOutOfBounds {
                start: edit.start,
                end: edit.end,
                len: text.len(),
            });
        }
        let start = snap_char_boundary_bwd(text, edit.start);
        let end = snap_char_boundary_fwd(text, edit.end);
        if end > floor {
            return Err(ForgeError::OverlappingEdits { start, end });
        }
        out.replace_range(start..end, &edit.replacement);
        floor = start;
    }
    Ok(out)
}

fn snap_char_boundary_bwd(s: &str, mut offset: usize) -> usize {
    while offset > 0 && !s.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

fn snap_char_boundary_fwd(s: &str, mut offset: usize) -> usize {
    while offset < s.len() && !s.is_char_boundary(offset) {
        offset += 1;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bottom_to_top_splice() {
        let text = "alpha\nbeta\ngamma\n";
        let edits = vec![
            TextEdit::insert(0, "// "),
            TextEdit::replace(6, 10, "BETA"),
            TextEdit::insert(11, "// "),
        ];
        assert_eq!(apply_edits(text, &edits).unwrap(), "// alpha\nBETA\n// gamma\n");
    }

    #[test]
    fn test_insertions_at_same_offset_keep_order() {
        let edits = vec![TextEdit::insert(0, "a"), TextEdit::insert(0, "b")];
        assert_eq!(apply_edits("x", &edits).unwrap(), "abx");
    }

    #[test]
    fn test_insert_before_replacement_at_same_offset() {
        let edits = vec![TextEdit::replace(0, 3, "XYZ"), TextEdit::insert(0, "> ")];
        assert_eq!(apply_edits("abc!", &edits).unwrap(), "> XYZ!");
    }

    #[test]
    fn test_overlap_rejected() {
        let edits = vec![TextEdit::replace(0, 4, "x"), TextEdit::replace(2, 6, "y")];
        assert!(matches!(
            apply_edits("0123456789", &edits),
            Err(ForgeError::OverlappingEdits { .. })
        ));
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        assert!(matches!(
            apply_edits("abc", &[TextEdit::replace(1, 9, "")]),
            Err(ForgeError::EditOutOfBounds { len: 3, .. })
        ));
    }

    #[test]
    fn test_utf8_emoji_boundary() {
        let text = "a🚀b";
        let rocket = text.find('🚀').unwrap();
        // Offsets inside the emoji widen to cover the whole character.
        let out = apply_edits(text, &[TextEdit::replace(rocket + 1, rocket + 2, "X")]).unwrap();
        assert_eq!(out, "aXb");
    }

    #[test]
    fn test_empty_edits_noop() {
        assert_eq!(apply_edits("same", &[]).unwrap(), "same");
    }
}
