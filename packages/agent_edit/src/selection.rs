//! Edit target resolution.
//!
//! When the user highlights text, the instruction applies to exactly that
//! text. With only a caret, the instruction applies to the paragraph around
//! it: the run of text between blank-line separators (`"\n\n"`).

use crate::protocol::Selection;

const SEPARATOR: [char; 2] = ['\n', '\n'];

/// Resolve the span an instruction targets.
///
/// Offsets are in chars. The result always satisfies
/// `0 <= from <= to <= content.chars().count()`; an empty document yields
/// `{0, 0}`.
pub fn resolve_target(content: &str, selection: Selection) -> Selection {
    let chars: Vec<char> = content.chars().collect();
    let clamped = Selection::new(selection.from.min(chars.len()), selection.to.min(chars.len()));

    if !clamped.is_empty() {
        return Selection::new(clamped.from.min(clamped.to), clamped.from.max(clamped.to));
    }
    paragraph_at(&chars, clamped.from)
}

/// Paragraph containing `cursor`.
///
/// Starts right after the last separator beginning strictly before the
/// cursor, ends at the first separator beginning at or after the cursor. A
/// caret between the two newlines of a separator belongs to the paragraph that
/// follows it.
fn paragraph_at(chars: &[char], cursor: usize) -> Selection {
    let start = separator_before(chars, cursor).map_or(0, |at| at + SEPARATOR.len());
    let end = separator_from(chars, cursor.max(start)).unwrap_or(chars.len());
    Selection::new(start, end)
}

fn is_separator_at(chars: &[char], at: usize) -> bool {
    chars.get(at..at + SEPARATOR.len()) == Some(&SEPARATOR[..])
}

fn separator_before(chars: &[char], cursor: usize) -> Option<usize> {
    (0..cursor).rev().find(|&at| is_separator_at(chars, at))
}

fn separator_from(chars: &[char], from: usize) -> Option<usize> {
    (from..chars.len()).find(|&at| is_separator_at(chars, at))
}
