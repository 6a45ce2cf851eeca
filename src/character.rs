//! Speaker attribution for chapter text.
//!
//! The classifier is a ranked heuristic: alias mentions beat system markers,
//! which beat speech-style scoring, which beats keyword overlap. It gives a
//! best-effort label with a confidence, never a guarantee. Ties between
//! profiles are broken by declaration order in the roster.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ReferenceError;
use crate::segmenter::{Segment, SegmentKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CharacterKind {
    #[serde(rename = "Jiang_Chen")]
    JiangChen,
    #[serde(rename = "Ye_Qingcheng")]
    YeQingcheng,
    #[serde(rename = "Du_Guyun")]
    DuGuyun,
    #[serde(rename = "Elder")]
    Elder,
    #[serde(rename = "System")]
    System,
    #[serde(rename = "Narrator")]
    Narrator,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl CharacterKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JiangChen => "Jiang_Chen",
            Self::YeQingcheng => "Ye_Qingcheng",
            Self::DuGuyun => "Du_Guyun",
            Self::Elder => "Elder",
            Self::System => "System",
            Self::Narrator => "Narrator",
            Self::Unknown => "Unknown",
        }
    }

    /// True for a concrete speaker (not narrator, system or unknown).
    #[must_use]
    pub fn is_person(self) -> bool {
        !matches!(self, Self::System | Self::Narrator | Self::Unknown)
    }
}

impl fmt::Display for CharacterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub kind: CharacterKind,
    /// Canonical (target-language) name.
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub speech_patterns: Vec<String>,
    #[serde(default)]
    pub thought_patterns: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub avoid: Vec<String>,
    #[serde(default)]
    pub prefer: Vec<String>,
    #[serde(default)]
    pub style: String,
    /// Substitutes for avoided words, applied by the resolver's style step.
    #[serde(default)]
    pub replacements: BTreeMap<String, String>,
}

impl CharacterProfile {
    /// Canonical name followed by aliases, empties and duplicates removed.
    pub fn surface_forms(&self) -> impl Iterator<Item = &str> {
        let mut seen: Vec<&str> = Vec::new();
        std::iter::once(self.name.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .filter(move |s| {
                if s.trim().is_empty() || seen.contains(s) {
                    return false;
                }
                seen.push(*s);
                true
            })
    }
}

/// Style preferences of one character, as consumed by the resolver.
#[derive(Clone, Copy, Debug)]
pub struct StyleProfile<'a> {
    pub avoid: &'a [String],
    pub prefer: &'a [String],
    pub style: &'a str,
    pub replacements: &'a BTreeMap<String, String>,
}

/// Profiles in declaration order with the alias-disjointness invariant checked.
#[derive(Clone, Debug, Default)]
pub struct CharacterRoster {
    profiles: Vec<CharacterProfile>,
}

impl CharacterRoster {
    pub fn new(profiles: Vec<CharacterProfile>) -> Result<Self, ReferenceError> {
        let mut owners: HashMap<String, &CharacterProfile> = HashMap::new();
        for p in &profiles {
            for form in p.surface_forms() {
                let key = form.to_lowercase();
                match owners.get(&key) {
                    Some(other) if other.kind != p.kind => {
                        return Err(ReferenceError::AmbiguousAlias {
                            alias: form.to_string(),
                            first: other.kind.to_string(),
                            second: p.kind.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        owners.insert(key, p);
                    }
                }
            }
        }
        Ok(Self { profiles })
    }

    #[must_use]
    pub fn profiles(&self) -> &[CharacterProfile] {
        &self.profiles
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    #[must_use]
    pub fn get(&self, kind: CharacterKind) -> Option<&CharacterProfile> {
        self.profiles.iter().find(|p| p.kind == kind)
    }

    #[must_use]
    pub fn style_for(&self, kind: CharacterKind) -> Option<StyleProfile<'_>> {
        self.get(kind).map(|p| StyleProfile {
            avoid: &p.avoid,
            prefer: &p.prefer,
            style: &p.style,
            replacements: &p.replacements,
        })
    }

    /// First alias literally present in `text`: a case-sensitive pass over the
    /// whole roster, then a case-insensitive one.
    #[must_use]
    pub fn find_alias<'a>(&'a self, text: &str) -> Option<(&'a CharacterProfile, &'a str)> {
        for p in &self.profiles {
            if let Some(form) = p.surface_forms().find(|f| text.contains(f)) {
                return Some((p, form));
            }
        }
        let lower = text.to_lowercase();
        for p in &self.profiles {
            if let Some(form) = p
                .surface_forms()
                .find(|f| lower.contains(&f.to_lowercase()))
            {
                return Some((p, form));
            }
        }
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Classification {
    pub kind: CharacterKind,
    pub confidence: f32,
}

impl Classification {
    const UNKNOWN: Self = Self {
        kind: CharacterKind::Unknown,
        confidence: 0.0,
    };
}

/// Per-character counts over a chapter's segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CharacterTally {
    pub segments: usize,
    pub dialogue: usize,
    pub thoughts: usize,
}

const STYLE_FLOOR_TENTHS: i32 = 3;

pub struct CharacterClassifier {
    roster: CharacterRoster,
    system: Option<Regex>,
}

impl CharacterClassifier {
    pub fn new(roster: CharacterRoster, system: Option<Regex>) -> Self {
        Self { roster, system }
    }

    #[must_use]
    pub fn roster(&self) -> &CharacterRoster {
        &self.roster
    }

    pub fn classify(&self, text: &str) -> Classification {
        if text.trim().is_empty() {
            return Classification::UNKNOWN;
        }
        if let Some((p, _)) = self.roster.find_alias(text) {
            return Classification {
                kind: p.kind,
                confidence: 1.0,
            };
        }
        if self.system.as_ref().is_some_and(|re| re.is_match(text)) {
            return Classification {
                kind: CharacterKind::System,
                confidence: 0.9,
            };
        }

        let lower = text.to_lowercase();
        if let Some(c) = self.by_speech_style(&lower) {
            return c;
        }
        self.by_keywords(&lower).unwrap_or(Classification::UNKNOWN)
    }

    // Scores are kept in tenths so the 0.3 floor compares exactly.
    fn by_speech_style(&self, lower: &str) -> Option<Classification> {
        let mut best: Option<(i32, CharacterKind)> = None;
        for p in self.roster.profiles() {
            let speech = count_hits(lower, &p.speech_patterns) as i32;
            let prefer = count_hits(lower, &p.prefer) as i32;
            let avoid = count_hits(lower, &p.avoid) as i32;
            let score = speech * 3 + prefer * 2 - avoid;
            if score > STYLE_FLOOR_TENTHS && best.map_or(true, |(b, _)| score > b) {
                best = Some((score, p.kind));
            }
        }
        best.map(|(score, kind)| Classification {
            kind,
            confidence: (score as f32 / 10.0).min(1.0),
        })
    }

    fn by_keywords(&self, lower: &str) -> Option<Classification> {
        let mut best: Option<(usize, CharacterKind)> = None;
        for p in self.roster.profiles() {
            let hits = count_hits(lower, &p.keywords);
            if hits > 0 && best.map_or(true, |(b, _)| hits > b) {
                best = Some((hits, p.kind));
            }
        }
        best.map(|(hits, kind)| Classification {
            kind,
            confidence: (hits as f32 * 0.2).min(0.8),
        })
    }

    /// Whether `text`, with quotation delimiters removed, uses one of the
    /// character's speech patterns.
    pub fn is_dialogue(&self, text: &str, kind: CharacterKind) -> bool {
        let Some(p) = self.roster.get(kind) else {
            return false;
        };
        let clean: String = text
            .chars()
            .filter(|c| !matches!(c, '"' | '«' | '»' | '—' | '“' | '”'))
            .collect();
        count_hits(&clean.to_lowercase(), &p.speech_patterns) > 0
    }

    /// Whether `text`, with brackets removed, uses one of the character's
    /// thought patterns.
    pub fn is_thought(&self, text: &str, kind: CharacterKind) -> bool {
        let Some(p) = self.roster.get(kind) else {
            return false;
        };
        let clean: String = text
            .chars()
            .filter(|c| !matches!(c, '[' | ']' | '(' | ')'))
            .collect();
        count_hits(&clean.to_lowercase(), &p.thought_patterns) > 0
    }

    pub fn statistics(&self, segments: &[Segment]) -> BTreeMap<CharacterKind, CharacterTally> {
        let mut out: BTreeMap<CharacterKind, CharacterTally> = BTreeMap::new();
        for seg in segments {
            if seg.kind == SegmentKind::EmptyLine {
                continue;
            }
            let kind = seg
                .character
                .unwrap_or_else(|| self.classify(&seg.content).kind);
            let tally = out.entry(kind).or_default();
            tally.segments += 1;
            if seg.kind == SegmentKind::Dialogue || self.is_dialogue(&seg.content, kind) {
                tally.dialogue += 1;
            }
            if self.is_thought(&seg.content, kind) {
                tally.thoughts += 1;
            }
        }
        out
    }
}

fn count_hits(lower_text: &str, patterns: &[String]) -> usize {
    patterns
        .iter()
        .filter(|p| !p.is_empty() && lower_text.contains(&p.to_lowercase()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(kind: CharacterKind, name: &str, aliases: &[&str]) -> CharacterProfile {
        CharacterProfile {
            kind,
            name: name.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            speech_patterns: Vec::new(),
            thought_patterns: Vec::new(),
            keywords: Vec::new(),
            avoid: Vec::new(),
            prefer: Vec::new(),
            style: String::new(),
            replacements: BTreeMap::new(),
        }
    }

    fn classifier() -> CharacterClassifier {
        let mut jiang = profile(CharacterKind::JiangChen, "Цзян Чэнь", &["Jiang Chen"]);
        jiang.speech_patterns = vec!["Дай мне".into(), "Можешь".into(), "Хочу".into()];
        jiang.keywords = vec!["безделье".into(), "награда".into()];
        jiang.avoid = vec!["весьма".into()];
        jiang.prefer = vec!["круто".into(), "реально".into()];
        let mut ye = profile(CharacterKind::YeQingcheng, "Е Цинчэн", &["Ye Qingcheng"]);
        ye.speech_patterns = vec!["Позвольте".into(), "Не могли бы вы".into()];
        ye.keywords = vec!["элегантность".into(), "красота".into()];
        ye.thought_patterns = vec!["подумала".into()];
        let roster = CharacterRoster::new(vec![jiang, ye]).expect("roster");
        let system = Regex::new("(?i)(?:Динь!|Система|Ding!)").expect("system re");
        CharacterClassifier::new(roster, Some(system))
    }

    #[test]
    fn alias_wins_with_full_confidence() {
        let c = classifier();
        let got = c.classify("Ding! Jiang Chen said: \"Позвольте...\"");
        assert_eq!(got.kind, CharacterKind::JiangChen);
        assert_eq!(got.confidence, 1.0);
    }

    #[test]
    fn alias_match_falls_back_to_case_insensitive() {
        let c = classifier();
        assert_eq!(c.classify("JIANG CHEN yawned").kind, CharacterKind::JiangChen);
    }

    #[test]
    fn system_marker_is_second() {
        let c = classifier();
        let got = c.classify("Динь! Задание выполнено.");
        assert_eq!(got.kind, CharacterKind::System);
        assert!((got.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn speech_style_needs_to_clear_floor() {
        let c = classifier();
        // one speech pattern alone is exactly 0.3: not enough
        let got = c.classify("Хочу спать.");
        assert_eq!(got.kind, CharacterKind::Unknown);

        let got = c.classify("Хочу спать, реально.");
        assert_eq!(got.kind, CharacterKind::JiangChen);
        assert!((got.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn keywords_are_capped() {
        let c = classifier();
        let got = c.classify("Её элегантность и красота поражали.");
        assert_eq!(got.kind, CharacterKind::YeQingcheng);
        assert!((got.confidence - 0.4).abs() < 1e-6);
    }

    fn tied(order: [CharacterKind; 2]) -> CharacterClassifier {
        let profiles = order
            .iter()
            .zip(["Первый", "Второй"])
            .map(|(&kind, name)| {
                let mut p = profile(kind, name, &[]);
                p.speech_patterns = vec!["Хочу".into(), "Можешь".into()];
                p.keywords = vec!["система".into()];
                p
            })
            .collect();
        CharacterClassifier::new(CharacterRoster::new(profiles).expect("roster"), None)
    }

    #[test]
    fn ties_go_to_the_first_declared_profile() {
        let forward = tied([CharacterKind::JiangChen, CharacterKind::DuGuyun]);
        let backward = tied([CharacterKind::DuGuyun, CharacterKind::JiangChen]);

        let speech = "Хочу спать. Можешь уйти?";
        assert_eq!(forward.classify(speech).kind, CharacterKind::JiangChen);
        assert_eq!(backward.classify(speech).kind, CharacterKind::DuGuyun);
        assert!((forward.classify(speech).confidence - 0.6).abs() < 1e-6);

        let keyword = "Молчала система.";
        assert_eq!(forward.classify(keyword).kind, CharacterKind::JiangChen);
        assert_eq!(backward.classify(keyword).kind, CharacterKind::DuGuyun);
        assert!((forward.classify(keyword).confidence - 0.2).abs() < 1e-6);
    }

    #[test]
    fn nothing_matches_is_unknown() {
        let c = classifier();
        let got = c.classify("Ветер гнал облака.");
        assert_eq!(got, Classification::UNKNOWN);
        assert_eq!(c.classify("   ").kind, CharacterKind::Unknown);
    }

    #[test]
    fn overlapping_aliases_are_rejected() {
        let a = profile(CharacterKind::JiangChen, "Цзян Чэнь", &["Chen"]);
        let b = profile(CharacterKind::DuGuyun, "Ду Гуюнь", &["chen"]);
        let err = CharacterRoster::new(vec![a, b]).expect_err("ambiguous");
        assert!(matches!(err, ReferenceError::AmbiguousAlias { .. }));
    }

    #[test]
    fn thought_detection_strips_brackets() {
        let c = classifier();
        assert!(c.is_thought("(Она подумала о нём)", CharacterKind::YeQingcheng));
        assert!(!c.is_thought("(Она подумала о нём)", CharacterKind::JiangChen));
        assert!(c.is_dialogue("«Можешь помолчать?»", CharacterKind::JiangChen));
    }
}
