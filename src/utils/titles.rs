//! Upload title sanitization.
//!
//! The video host rejects titles with angle brackets and characters outside
//! a conservative repertoire, so titles are reduced deterministically:
//! only Basic Latin printable characters, the Latin-1 Supplement, and
//! whitespace survive; `<` and `>` are removed; whitespace collapses to
//! single spaces; blank results become a placeholder; the result is capped
//! at [`MAX_TITLE_LEN`] characters. The function is idempotent.

/// Maximum title length accepted by the video host, in characters.
pub const MAX_TITLE_LEN: usize = 100;

/// Placeholder for titles that sanitize to nothing.
pub const UNTITLED: &str = "Untitled Video";

fn keep(c: char) -> bool {
    if c == '<' || c == '>' {
        return false;
    }
    matches!(c, '\u{20}'..='\u{7E}' | '\u{A0}'..='\u{FF}') || c.is_whitespace()
}

/// Sanitize a VOD title for upload.
pub fn sanitize_title(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_TITLE_LEN));
    let mut pending_space = false;
    for c in input.chars().filter(|&c| keep(c)) {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }

    if out.is_empty() {
        return UNTITLED.to_string();
    }

    if out.chars().count() > MAX_TITLE_LEN {
        out = out.chars().take(MAX_TITLE_LEN).collect();
        out.truncate(out.trim_end().len());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_emoji_and_angle_brackets() {
        assert_eq!(sanitize_title("  Epic   <Stream> \u{1F3AE}  "), "Epic Stream");
    }

    #[test]
    fn test_blank_result_becomes_untitled() {
        assert_eq!(sanitize_title("\u{1F3AE}\u{1F3AE}"), UNTITLED);
        assert_eq!(sanitize_title(""), UNTITLED);
        assert_eq!(sanitize_title("   "), UNTITLED);
        assert_eq!(sanitize_title("<>"), UNTITLED);
    }

    #[test]
    fn test_truncates_to_limit() {
        let long = "A".repeat(150);
        assert_eq!(sanitize_title(&long).chars().count(), 100);
    }

    #[test]
    fn test_truncation_trims_trailing_whitespace() {
        // 99 chars then a space then more text: the cut lands on the space.
        let input = format!("{} {}", "A".repeat(99), "B".repeat(20));
        let out = sanitize_title(&input);
        assert_eq!(out, "A".repeat(99));
    }

    #[test]
    fn test_latin1_supplement_is_kept() {
        assert_eq!(sanitize_title("Caf\u{E9} stream \u{DF}"), "Caf\u{E9} stream \u{DF}");
    }

    #[test]
    fn test_internal_angle_brackets_do_not_leave_double_spaces() {
        assert_eq!(sanitize_title("a < b"), "a b");
    }

    #[test]
    fn test_idempotent() {
        let long = "A".repeat(150);
        let padded = format!("{} tail", "B".repeat(120));
        let inputs = [
            "  Epic   <Stream> \u{1F3AE}  ",
            "\u{1F3AE}\u{1F3AE}",
            "a < b",
            "plain title",
            long.as_str(),
            padded.as_str(),
        ];
        for input in inputs {
            let once = sanitize_title(input);
            assert_eq!(sanitize_title(&once), once, "not idempotent for {input:?}");
            assert!(once.chars().count() <= MAX_TITLE_LEN);
        }
    }
}
