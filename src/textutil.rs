use std::borrow::Cow;
use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static SENTENCE_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?…]+").expect("sentence end"));
static BLANK_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\r?\n[ \t]*){3,}").expect("blank run"));

/// Lowercased whitespace-separated word set, the unit of token-overlap similarity.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// A sentence of `text` with the byte offset where it starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentenceSpan<'a> {
    pub start: usize,
    pub text: &'a str,
}

/// Split on runs of sentence terminators; empty pieces are dropped and offsets
/// point at the first non-whitespace byte of each sentence.
pub fn sentence_spans(text: &str) -> Vec<SentenceSpan<'_>> {
    let mut out = Vec::new();
    let mut last = 0usize;
    let mut push = |from: usize, to: usize| {
        let piece = &text[from..to];
        let trimmed = piece.trim_start();
        let lead = piece.len() - trimmed.len();
        let trimmed = trimmed.trim_end();
        if !trimmed.is_empty() {
            out.push(SentenceSpan {
                start: from + lead,
                text: trimmed,
            });
        }
    };
    for m in SENTENCE_END_RE.find_iter(text) {
        push(last, m.start());
        last = m.end();
    }
    push(last, text.len());
    out
}

/// 1-based line number of the byte at `offset`.
pub fn line_number_at(text: &str, offset: usize) -> usize {
    let offset = floor_char_boundary(text, offset.min(text.len()));
    text[..offset].matches('\n').count() + 1
}

/// Up to `radius` characters on each side of `start..end`, newlines flattened.
pub fn context_snippet(text: &str, start: usize, end: usize, radius: usize) -> String {
    let start = floor_char_boundary(text, start.min(text.len()));
    let end = floor_char_boundary(text, end.min(text.len())).max(start);
    let before: usize = text[..start]
        .char_indices()
        .rev()
        .take(radius)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let after: usize = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    text[before..after].replace(['\r', '\n'], " ").trim().to_string()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((idx, _)) => Cow::Owned(format!("{}…", &text[..idx])),
    }
}

/// `replacement` with its first letter upper-cased when `found` starts with
/// an upper-case letter.
pub fn match_leading_case(found: &str, replacement: &str) -> String {
    let found_upper = found.chars().next().is_some_and(char::is_uppercase);
    let mut chars = replacement.chars();
    match chars.next() {
        Some(first) if found_upper && first.is_lowercase() => {
            first.to_uppercase().chain(chars).collect()
        }
        _ => replacement.to_string(),
    }
}

/// Collapse three or more consecutive line breaks into a single blank line.
pub fn normalize_blank_lines(text: &str) -> Cow<'_, str> {
    BLANK_RUN_RE.replace_all(text, "\n\n")
}

/// Decode chapter bytes, honouring a UTF-8 or UTF-16 byte order mark.
///
/// Returns the text and whether malformed sequences had to be replaced.
pub fn decode_text(bytes: &[u8]) -> (String, bool) {
    let (text, _encoding, had_errors) = encoding_rs::UTF_8.decode(bytes);
    (text.into_owned(), had_errors)
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
