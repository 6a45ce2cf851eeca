//! Chapter text to ordered, typed segments.
//!
//! Line mode keeps one segment per source line (blank lines included, raw
//! whitespace and `\r` preserved) so [`reassemble`] restores the input
//! byte-for-byte. Paragraph mode groups consecutive non-blank lines and drops
//! the blank separators.

use std::collections::BTreeSet;

use regex::Regex;
use serde::Serialize;

use crate::character::{CharacterKind, CharacterRoster};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    EmptyLine,
    Dialogue,
    SystemNotice,
    Description,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentMode {
    #[default]
    Lines,
    Paragraphs,
}

impl SegmentMode {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("lines").trim().to_ascii_lowercase().as_str() {
            "paragraphs" | "paragraph" => Self::Paragraphs,
            _ => Self::Lines,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub content: String,
    pub kind: SegmentKind,
    /// 1-based line of the (first) source line.
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character: Option<CharacterKind>,
    /// The source line ended in `\r\n`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub trailing_cr: bool,
}

impl Segment {
    #[must_use]
    pub fn is_empty_line(&self) -> bool {
        self.kind == SegmentKind::EmptyLine
    }
}

/// A length-bounded group of segments sent to the translate capability together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SegmentBatch {
    /// Indices into the segment slice the batch was built from.
    pub indices: Vec<usize>,
    pub text: String,
    pub chars: usize,
}

/// Segment counts and blank-line positions of two segmentations side by side.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StructureReport {
    pub original_segments: usize,
    pub translated_segments: usize,
    pub original_empty_lines: Vec<usize>,
    pub translated_empty_lines: Vec<usize>,
    pub structure_match: bool,
    pub match_percentage: f64,
}

pub struct Segmenter {
    dialogue: Vec<Regex>,
    system: Option<Regex>,
    roster: CharacterRoster,
}

impl Segmenter {
    pub fn new(dialogue: Vec<Regex>, system: Option<Regex>, roster: CharacterRoster) -> Self {
        Self {
            dialogue,
            system,
            roster,
        }
    }

    pub fn segment(&self, text: &str, mode: SegmentMode) -> Vec<Segment> {
        match mode {
            SegmentMode::Lines => self.split_lines(text),
            SegmentMode::Paragraphs => self.split_paragraphs(text),
        }
    }

    pub fn split_lines(&self, text: &str) -> Vec<Segment> {
        if text.is_empty() {
            return Vec::new();
        }
        text.split('\n')
            .enumerate()
            .map(|(idx, raw)| {
                let (content, trailing_cr) = match raw.strip_suffix('\r') {
                    Some(c) => (c, true),
                    None => (raw, false),
                };
                self.build(content.to_string(), idx + 1, trailing_cr)
            })
            .collect()
    }

    pub fn split_paragraphs(&self, text: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        let mut lines: Vec<&str> = Vec::new();
        let mut start = 0usize;
        for (idx, raw) in text.split('\n').enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                if !lines.is_empty() {
                    out.push(self.build(lines.join("\n"), start, false));
                    lines.clear();
                }
                continue;
            }
            if lines.is_empty() {
                start = idx + 1;
            }
            lines.push(line);
        }
        if !lines.is_empty() {
            out.push(self.build(lines.join("\n"), start, false));
        }
        out
    }

    /// Kind by precedence: blank, dialogue, system notice, description.
    pub fn classify(&self, content: &str) -> SegmentKind {
        if content.trim().is_empty() {
            SegmentKind::EmptyLine
        } else if self.dialogue.iter().any(|re| re.is_match(content)) {
            SegmentKind::Dialogue
        } else if self.system.as_ref().is_some_and(|re| re.is_match(content)) {
            SegmentKind::SystemNotice
        } else {
            SegmentKind::Description
        }
    }

    fn build(&self, content: String, line: usize, trailing_cr: bool) -> Segment {
        let kind = self.classify(&content);
        let character = if kind == SegmentKind::EmptyLine {
            None
        } else {
            self.roster.find_alias(&content).map(|(p, _)| p.kind)
        };
        Segment {
            content,
            kind,
            line,
            character,
            trailing_cr,
        }
    }
}

/// Inverse of segmentation. Line segments are joined with `\n` (plus their own
/// `\r`); paragraph segments with a blank line.
pub fn reassemble(segments: &[Segment], mode: SegmentMode) -> String {
    match mode {
        SegmentMode::Lines => {
            let mut out = String::new();
            for (i, seg) in segments.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                out.push_str(&seg.content);
                if seg.trailing_cr {
                    out.push('\r');
                }
            }
            out
        }
        SegmentMode::Paragraphs => segments
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

pub fn dialogue_segments(segments: &[Segment]) -> Vec<&Segment> {
    segments
        .iter()
        .filter(|s| s.kind == SegmentKind::Dialogue)
        .collect()
}

pub fn system_segments(segments: &[Segment]) -> Vec<&Segment> {
    segments
        .iter()
        .filter(|s| s.kind == SegmentKind::SystemNotice)
        .collect()
}

pub fn character_segments(segments: &[Segment], kind: CharacterKind) -> Vec<&Segment> {
    segments
        .iter()
        .filter(|s| s.character == Some(kind))
        .collect()
}

/// Greedy packing: an item joins the open group unless that would push the
/// group past `budget`; an oversized item gets a group of its own.
pub fn pack_by_budget(
    items: impl IntoIterator<Item = (usize, usize)>,
    budget: usize,
) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut used = 0usize;
    for (idx, len) in items {
        if !current.is_empty() && used + len > budget {
            groups.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(idx);
        used += len;
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Translation batches over the non-empty segments, in order.
pub fn split_into_batches(segments: &[Segment], max_chars: usize) -> Vec<SegmentBatch> {
    let items = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_empty_line())
        .map(|(i, s)| (i, s.content.chars().count()));
    pack_by_budget(items, max_chars)
        .into_iter()
        .map(|indices| {
            let text = indices
                .iter()
                .map(|&i| segments[i].content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            let chars = indices
                .iter()
                .map(|&i| segments[i].content.chars().count())
                .sum();
            SegmentBatch {
                indices,
                text,
                chars,
            }
        })
        .collect()
}

pub fn compare_structure(original: &[Segment], translated: &[Segment]) -> StructureReport {
    let empties = |segs: &[Segment]| -> Vec<usize> {
        segs.iter()
            .filter(|s| s.is_empty_line())
            .map(|s| s.line)
            .collect()
    };
    let original_empty_lines = empties(original);
    let translated_empty_lines = empties(translated);

    let translated_set: BTreeSet<usize> = translated_empty_lines.iter().copied().collect();
    let matching = original_empty_lines
        .iter()
        .filter(|l| translated_set.contains(l))
        .count();
    let match_percentage = if original_empty_lines.is_empty() {
        if translated_empty_lines.is_empty() {
            100.0
        } else {
            0.0
        }
    } else {
        matching as f64 / original_empty_lines.len() as f64 * 100.0
    };

    StructureReport {
        original_segments: original.len(),
        translated_segments: translated.len(),
        structure_match: original.len() == translated.len()
            && original_empty_lines == translated_empty_lines,
        original_empty_lines,
        translated_empty_lines,
        match_percentage,
    }
}
