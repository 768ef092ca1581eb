//! Unicode-scalar ↔ UTF-16 code-unit index conversion.
//!
//! The VFS's `spliceText` operation addresses text in Unicode scalar units
//! (`char` boundaries), matching the data model's string semantics. `yrs`'s
//! `TextRef`, like Yjs, indexes in UTF-16 code units. Every splice crosses
//! this boundary once on the way in (scalar → UTF-16) and the read path
//! never needs the reverse conversion, since `get_string` returns the whole
//! string and callers re-derive scalar offsets from it directly.

/// Convert a scalar-unit offset into `text` to the equivalent UTF-16
/// code-unit offset. `scalar_offset` must be `<= text.chars().count()`.
pub fn scalar_to_utf16_offset(text: &str, scalar_offset: usize) -> u32 {
    text.chars()
        .take(scalar_offset)
        .map(|c| c.len_utf16())
        .sum::<usize>() as u32
}

/// Convert a scalar-unit length starting at `scalar_start` into `text` to
/// the equivalent UTF-16 code-unit length.
pub fn scalar_len_to_utf16_len(text: &str, scalar_start: usize, scalar_len: usize) -> u32 {
    text.chars()
        .skip(scalar_start)
        .take(scalar_len)
        .map(|c| c.len_utf16())
        .sum::<usize>() as u32
}

/// Number of Unicode scalar values (`char`s) in `text`.
pub fn scalar_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_offsets_are_identity() {
        assert_eq!(scalar_to_utf16_offset("hello", 3), 3);
        assert_eq!(scalar_len_to_utf16_len("hello", 1, 2), 2);
    }

    #[test]
    fn astral_characters_count_as_two_utf16_units() {
        let text = "a\u{1F600}b"; // a, 😀 (surrogate pair), b
        assert_eq!(scalar_len(text), 3);
        assert_eq!(scalar_to_utf16_offset(text, 1), 1);
        assert_eq!(scalar_to_utf16_offset(text, 2), 3);
        assert_eq!(scalar_to_utf16_offset(text, 3), 4);
        assert_eq!(scalar_len_to_utf16_len(text, 1, 1), 2);
    }
}
