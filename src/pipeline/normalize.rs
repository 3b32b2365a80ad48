//! Deterministic cleanup of text scraped from the page.
//!
//! DOM text nodes arrive with the page's formatting noise: indentation
//! carried over from templates, Windows line endings, non-breaking and
//! full-width spaces, zero-width joiners left by rich-text editors. The
//! layout stage measures and wraps text by character, so every extracted
//! field runs through [`clean_text`] first.
//!
//! ## Rule Order
//!
//! Line endings are normalised before per-line trimming, invisible
//! characters are removed before blank-line collapsing (a line holding only
//! a zero-width space must count as blank), and the outer trim runs last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to one extracted text value.
///
/// 1. Normalise line endings (CRLF/CR → LF)
/// 2. Replace non-breaking spaces with plain spaces
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim whitespace at both ends of every line
/// 5. Collapse runs of blank lines down to one
/// 6. Trim the whole value
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = replace_nbsp(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_lines(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

/// Collapse all internal whitespace to single spaces; for one-line fields
/// such as choice labels and item identifiers.
pub fn clean_inline(input: &str) -> String {
    let s = remove_invisible_chars(&replace_nbsp(input));
    RE_WHITESPACE.replace_all(s.trim(), " ").to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Non-breaking spaces ──────────────────────────────────────────────

fn replace_nbsp(input: &str) -> String {
    input.replace(['\u{00A0}', '\u{202F}'], " ")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim each line ───────────────────────────────────────────────────

fn trim_lines(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────
