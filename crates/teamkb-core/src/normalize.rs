//! Whitespace normalization applied to every extracted text.

use regex::Regex;
use std::sync::LazyLock;

static HORIZONTAL_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_LINE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalize extracted text.
///
/// Strips NUL bytes, collapses runs of spaces and tabs into one space,
/// collapses three or more consecutive newlines into exactly two, and
/// trims the result.
pub fn normalize(text: &str) -> String {
    let text = text.trim().replace('\0', "");
    let text = HORIZONTAL_RUNS.replace_all(&text, " ");
    let text = BLANK_LINE_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}
