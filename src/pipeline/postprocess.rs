//! Post-processing: deterministic cleanup of model-generated transcripts.
//!
//! ## Why is post-processing necessary?
//!
//! Even with a strict "raw text only" prompt the model occasionally adds
//! packaging around the text it recovered:
//!
//! - wrapping the whole answer in a ` ```text ... ``` ` fence
//! - opening with "Here is the transcribed text:"
//! - Windows line endings, trailing spaces, zero-width characters
//!
//! These rules strip the packaging without touching the recovered words.
//! Keeping them here rather than in the prompt means the prompt stays focused
//! on *what to extract*. Blank pages stay blank: an empty answer is valid
//! output and is returned as an empty string.
//!
//! ## Rule order
//!
//! Fences are stripped before line endings are normalised, so the fence
//! regex sees the raw answer; the preamble is removed after fences so a
//! preamble inside a fence is still caught.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to one unit's raw model output.
///
/// Rules (applied in order):
/// 1. Strip an outer code fence (any or no language tag)
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Drop a leading "Here is the transcription:" style preamble
/// 4. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 5. Trim trailing whitespace per line
/// 6. Collapse runs of blank lines to a single blank line
/// 7. Trim leading and trailing blank lines
pub fn clean_text(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = strip_preamble(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    trim_blank_edges(&s)
}

// ── Rule 1: Strip outer fence ────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*\r?\n(.*?)\r?\n?```\s*$").unwrap()
});

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Strip preamble ───────────────────────────────────────────────────

static RE_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:sure[,!.]?\s*)?(?:here is|here's|below is)\s+(?:the\s+)?(?:raw\s+|full\s+|extracted\s+|transcribed\s+)*(?:text|transcription|transcript)[^\n]*:[ \t]*\n",
    )
    .unwrap()
});

fn strip_preamble(input: &str) -> String {
    RE_PREAMBLE.replace(input, "").to_string()
}

// ── Rule 4: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 7: Trim blank edges ─────────────────────────────────────────────────

fn trim_blank_edges(input: &str) -> String {
    input.trim_matches('\n').to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fence_with_language() {
        assert_eq!(strip_outer_fence("```text\nHello\nWorld\n```"), "Hello\nWorld");
        assert_eq!(strip_outer_fence("```\nHello\n```"), "Hello");
    }

    #[test]
    fn test_inner_fence_untouched() {
        let input = "Intro\n```\ncode\n```\nOutro";
        assert_eq!(strip_outer_fence(input), input);
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_strip_preamble() {
        assert_eq!(strip_preamble("Here is the transcribed text:\nChapter 1"), "Chapter 1");
        assert_eq!(strip_preamble("Sure! Here's the transcription:\nA"), "A");
        assert_eq!(
            strip_preamble("Here is the house where I lived.\n"),
            "Here is the house where I lived.\n"
        );
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}c\u{00AD}d"), "abcd");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_blank_page_stays_empty() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("  \n\n "), "");
    }

    #[test]
    fn test_clean_text_full_pipeline() {
        let input = "```\r\nHere is the extracted text:\r\nLine one   \r\n\r\n\r\n\r\nLine\u{200B} two\r\n```";
        assert_eq!(clean_text(input), "Line one\n\nLine two");
    }

    #[test]
    fn test_paragraphs_preserved() {
        let input = "First paragraph.\n\nSecond paragraph.";
        assert_eq!(clean_text(input), input);
    }
}
