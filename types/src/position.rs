//! Conversion between flat buffer offsets and the analysis service's
//! 1-based `(line, offset)` coordinates.
//!
//! Offsets and columns count UTF-16 code units, as editors and the service
//! do, so a character outside the BMP is two wide. Only `\n` terminates a
//! line; a `\r` before it is an ordinary column character, so CRLF text maps
//! to the same coordinates on every platform. Both directions clamp
//! out-of-range input to the nearest valid position instead of failing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A 1-based line and 1-based offset within that line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct LineOffset {
    pub line: u32,
    pub offset: u32,
}

impl LineOffset {
    #[must_use]
    pub const fn new(line: u32, offset: u32) -> Self {
        Self { line, offset }
    }
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Buffer offset to line/offset. Offsets past the end map to the end; an
/// offset inside a surrogate pair maps to the start of that character.
#[must_use]
pub fn to_line_offset(text: &str, offset: usize) -> LineOffset {
    let mut line: usize = 1;
    let mut column: usize = 1;
    let mut units: usize = 0;
    for ch in text.chars() {
        let width = ch.len_utf16();
        if units + width > offset {
            break;
        }
        units += width;
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += width;
        }
    }
    LineOffset::new(saturating_u32(line), saturating_u32(column))
}

/// Line/offset to buffer offset.
///
/// Lines past the last line clamp to the last line; offsets past the end of a
/// line clamp to its end (just before the `\n`), and an offset inside a
/// surrogate pair clamps to the start of that character. Zero is treated as
/// one.
#[must_use]
pub fn to_offset(text: &str, position: LineOffset) -> usize {
    let target_line = position.line.max(1) as usize;
    let wanted = position.offset.max(1) as usize - 1;

    let mut lines = text.split('\n');
    let mut current = lines.next().unwrap_or_default();
    let mut line_start = 0;
    for _ in 1..target_line {
        let Some(next) = lines.next() else {
            break;
        };
        line_start += utf16_len(current) + 1;
        current = next;
    }

    let mut column = 0;
    for ch in current.chars() {
        let width = ch.len_utf16();
        if column + width > wanted {
            break;
        }
        column += width;
    }
    line_start + column
}

/// Length of `text` in UTF-16 code units.
#[must_use]
pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURES: &[&str] = &[
        "",
        "a",
        "\n",
        "\n\n",
        "const x = 1;\nconst y = 2;\n",
        "line one\r\nline two\r\n\r\nlast",
        "héllo\nwörld 🌍\n",
        "no trailing newline",
        "\r\r\n\r",
    ];

    #[test]
    fn round_trip_every_offset() {
        for text in FIXTURES {
            let mut boundaries = vec![0];
            for ch in text.chars() {
                boundaries.push(boundaries[boundaries.len() - 1] + ch.len_utf16());
            }
            for offset in boundaries {
                let pos = to_line_offset(text, offset);
                assert_eq!(
                    to_offset(text, pos),
                    offset,
                    "text {text:?} offset {offset} via {pos:?}"
                );
            }
        }
    }

    #[test]
    fn start_of_text_is_one_one() {
        assert_eq!(to_line_offset("abc", 0), LineOffset::new(1, 1));
        assert_eq!(to_line_offset("", 0), LineOffset::new(1, 1));
    }

    #[test]
    fn newline_advances_line() {
        let text = "ab\ncd";
        assert_eq!(to_line_offset(text, 2), LineOffset::new(1, 3));
        assert_eq!(to_line_offset(text, 3), LineOffset::new(2, 1));
        assert_eq!(to_line_offset(text, 5), LineOffset::new(2, 3));
    }

    #[test]
    fn crlf_keeps_carriage_return_as_column() {
        let text = "ab\r\ncd";
        assert_eq!(to_line_offset(text, 3), LineOffset::new(1, 4));
        assert_eq!(to_line_offset(text, 4), LineOffset::new(2, 1));
        assert_eq!(to_offset(text, LineOffset::new(2, 2)), 5);
    }

    #[test]
    fn offset_past_end_clamps() {
        assert_eq!(to_line_offset("ab\nc", 100), LineOffset::new(2, 2));
    }

    #[test]
    fn line_past_end_clamps_to_last_line() {
        let text = "ab\ncd";
        assert_eq!(to_offset(text, LineOffset::new(9, 1)), 3);
        assert_eq!(to_offset(text, LineOffset::new(9, 99)), 5);
    }

    #[test]
    fn column_past_line_end_clamps_before_newline() {
        let text = "ab\ncd";
        assert_eq!(to_offset(text, LineOffset::new(1, 40)), 2);
    }

    #[test]
    fn zero_coordinates_are_treated_as_one() {
        assert_eq!(to_offset("ab\ncd", LineOffset::new(0, 0)), 0);
    }

    #[test]
    fn astral_characters_are_two_units_wide() {
        let text = "é🌍x";
        assert_eq!(utf16_len(text), 4);
        assert_eq!(to_line_offset(text, 3), LineOffset::new(1, 4));
        assert_eq!(to_offset(text, LineOffset::new(1, 4)), 3);
    }

    #[test]
    fn property_access_after_emoji_string() {
        // `x` is five units into its line: the emoji takes two.
        let text = "const s = 1;\n'🌍'.x";
        let x = 13 + 5;
        assert_eq!(to_line_offset(text, x), LineOffset::new(2, 6));
        assert_eq!(to_offset(text, LineOffset::new(2, 6)), x);
    }

    #[test]
    fn offset_inside_surrogate_pair_snaps_to_char_start() {
        let text = "a🌍b";
        assert_eq!(to_line_offset(text, 2), LineOffset::new(1, 2));
        assert_eq!(to_offset(text, LineOffset::new(1, 3)), 1);
    }
}
