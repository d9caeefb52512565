//! Text cleanup shared by the AI strategies.

use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s.,!?;:-]").expect("valid regex"));

/// Strip markup and symbols, collapse whitespace.
pub fn clean_content(content: &str) -> String {
    let text = TAG_RE.replace_all(content, " ");
    let text = SYMBOL_RE.replace_all(&text, " ");
    SPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
