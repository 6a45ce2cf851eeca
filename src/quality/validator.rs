use std::sync::Arc;

use crate::quality::{
    IssueCategory, LineStats, MetricValues, QualityMetric, ReadabilityStats, Severity,
    ValidationIssue, ValidationResult, PASS_SCORE,
};
use crate::reference::ReferenceData;
use crate::textutil::{context_snippet, line_number_at, sentence_spans, word_count};

const CONTEXT_RADIUS: usize = 30;
const LINE_TOLERANCE: usize = 2;
const BLANK_LINE_TOLERANCE: usize = 1;

pub struct ChapterValidator {
    reference: Arc<ReferenceData>,
}

impl ChapterValidator {
    pub fn new(reference: Arc<ReferenceData>) -> Self {
        Self { reference }
    }

    pub fn validate(&self, original: &str, translated: &str) -> ValidationResult {
        let original_lines = LineStats::of(original);
        let translated_lines = LineStats::of(translated);

        let mut issues = Vec::new();
        check_structure(&original_lines, &translated_lines, &mut issues);
        self.check_archaisms(translated, &mut issues);
        self.check_listed_phrases(translated, &mut issues);
        self.check_terminology(translated, &mut issues);
        self.check_readability(translated, &mut issues);
        self.check_names(translated, &mut issues);

        let count = |cat: IssueCategory| issues.iter().filter(|i| i.category == cat).count() as f64;
        let scores = MetricValues {
            dialogue_naturalness: (100.0 - 10.0 * count(IssueCategory::FormalDialogue)).max(0.0),
            terminology_consistency: (100.0 - 15.0 * count(IssueCategory::Terminology)).max(0.0),
            character_voice: (100.0 - 20.0 * count(IssueCategory::Archaism)).max(0.0),
            cultural_adaptation: (100.0 - 15.0 * count(IssueCategory::Calque)).max(0.0),
        };
        let quality = self.reference.quality();
        let overall_score = round1(scores.weighted_by(&quality.weights));
        let critical = issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .count();
        let is_valid = critical == 0 && overall_score >= PASS_SCORE;

        let mut recommendations = Vec::new();
        if critical > 0 {
            recommendations.push(format!("Fix {critical} critical issue(s) before publishing"));
        }
        for m in QualityMetric::ALL {
            let (score, min) = (scores.get(m), quality.thresholds.get(m));
            if score < min {
                recommendations.push(format!(
                    "{m} is {score:.1}, below the minimum {min:.1}: {}",
                    metric_hint(m)
                ));
            }
        }

        let readability = ReadabilityStats::of(translated, self.reference.rules());

        ValidationResult {
            is_valid,
            issues,
            scores,
            overall_score,
            recommendations,
            original_lines,
            translated_lines,
            readability,
        }
    }

    fn check_archaisms(&self, text: &str, issues: &mut Vec<ValidationIssue>) {
        for (word, re) in &self.reference.rules().archaisms {
            let alt = self.reference.preferred_alternative(word);
            for m in re.find_iter(text) {
                issues.push(issue_at(
                    text,
                    m.start(),
                    m.end(),
                    IssueCategory::Archaism,
                    Severity::Critical,
                    format!("archaic word «{}»", m.as_str()),
                    (alt != word.as_str()).then(|| alt.to_string()),
                ));
            }
        }
    }

    fn check_listed_phrases(&self, text: &str, issues: &mut Vec<ValidationIssue>) {
        let tables = &self.reference.rules().tables;
        let lists = [
            (&tables.calques, IssueCategory::Calque, Severity::High, "calque"),
            (
                &tables.formal_dialogue,
                IssueCategory::FormalDialogue,
                Severity::Medium,
                "formal phrasing",
            ),
        ];
        for (table, category, severity, what) in lists {
            for (phrase, suggestion) in table {
                if phrase.is_empty() {
                    continue;
                }
                for (start, matched) in text.match_indices(phrase.as_str()) {
                    issues.push(issue_at(
                        text,
                        start,
                        start + matched.len(),
                        category,
                        severity,
                        format!("{what} «{phrase}»"),
                        Some(suggestion.clone()).filter(|s| !s.is_empty()),
                    ));
                }
            }
        }
    }

    fn check_terminology(&self, text: &str, issues: &mut Vec<ValidationIssue>) {
        for term in self.reference.glossary().untranslated_in(text) {
            let start = text.find(&term.src).unwrap_or(0);
            issues.push(issue_at(
                text,
                start,
                start + term.src.len(),
                IssueCategory::Terminology,
                Severity::High,
                match term.category.as_deref() {
                    Some(cat) => format!("glossary term «{}» ({cat}) left untranslated", term.src),
                    None => format!("glossary term «{}» left untranslated", term.src),
                },
                Some(term.tgt.clone()),
            ));
        }
    }

    fn check_readability(&self, text: &str, issues: &mut Vec<ValidationIssue>) {
        let max_words = self.reference.rules().tables.max_sentence_words;
        for sentence in sentence_spans(text) {
            let words = word_count(sentence.text);
            if words > max_words {
                issues.push(issue_at(
                    text,
                    sentence.start,
                    sentence.start + sentence.text.len(),
                    IssueCategory::Readability,
                    Severity::Medium,
                    format!("sentence of {words} words (max {max_words})"),
                    None,
                ));
            }
        }
    }

    fn check_names(&self, text: &str, issues: &mut Vec<ValidationIssue>) {
        for profile in self.reference.roster().profiles() {
            if !profile.kind.is_person() {
                continue;
            }
            let found: Vec<&str> = profile.surface_forms().filter(|f| text.contains(f)).collect();
            // "Jiang Chen" inside "Jiang Chen's" is one form, not two
            let distinct: Vec<&str> = found
                .iter()
                .copied()
                .filter(|f| !found.iter().any(|g| g != f && g.contains(f)))
                .collect();
            if distinct.len() > 1 {
                let start = text.find(distinct[1]).unwrap_or(0);
                issues.push(issue_at(
                    text,
                    start,
                    start + distinct[1].len(),
                    IssueCategory::Consistency,
                    Severity::High,
                    format!(
                        "{} appears as {}",
                        profile.name,
                        distinct
                            .iter()
                            .map(|f| format!("«{f}»"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                    Some(profile.name.clone()),
                ));
            }
        }
    }
}

fn check_structure(original: &LineStats, translated: &LineStats, issues: &mut Vec<ValidationIssue>) {
    let line_delta = original.content_lines.abs_diff(translated.content_lines);
    if line_delta > LINE_TOLERANCE {
        issues.push(ValidationIssue {
            category: IssueCategory::Structure,
            severity: Severity::High,
            message: format!(
                "line count differs: original {}, translated {}",
                original.content_lines, translated.content_lines
            ),
            line: 1,
            context: String::new(),
            suggestion: Some("keep one translated line per source line".to_string()),
        });
    }
    let blank_delta = original.empty_lines.abs_diff(translated.empty_lines);
    if blank_delta > BLANK_LINE_TOLERANCE {
        issues.push(ValidationIssue {
            category: IssueCategory::Structure,
            severity: Severity::Medium,
            message: format!(
                "blank line count differs: original {}, translated {}",
                original.empty_lines, translated.empty_lines
            ),
            line: 1,
            context: String::new(),
            suggestion: None,
        });
    }
}

fn issue_at(
    text: &str,
    start: usize,
    end: usize,
    category: IssueCategory,
    severity: Severity,
    message: String,
    suggestion: Option<String>,
) -> ValidationIssue {
    ValidationIssue {
        category,
        severity,
        message,
        line: line_number_at(text, start),
        context: context_snippet(text, start, end, CONTEXT_RADIUS),
        suggestion,
    }
}

fn metric_hint(metric: QualityMetric) -> &'static str {
    match metric {
        QualityMetric::DialogueNaturalness => "simplify dialogue, drop formal phrasing",
        QualityMetric::TerminologyConsistency => "check glossary terms",
        QualityMetric::CharacterVoice => "remove archaic words",
        QualityMetric::CulturalAdaptation => "rewrite literal calques",
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
