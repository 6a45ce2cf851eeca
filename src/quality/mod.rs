mod readability;
mod structure;
mod validator;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::reference::RuleTables;

pub use readability::ReadabilityStats;
pub use structure::LineStats;
pub use validator::ChapterValidator;

/// Minimum weighted score for a chapter to pass.
pub const PASS_SCORE: f64 = 70.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Structure,
    Archaism,
    Calque,
    FormalDialogue,
    Terminology,
    Readability,
    Consistency,
}

impl IssueCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structure => "structure",
            Self::Archaism => "archaism",
            Self::Calque => "calque",
            Self::FormalDialogue => "formal_dialogue",
            Self::Terminology => "terminology",
            Self::Readability => "readability",
            Self::Consistency => "consistency",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QualityMetric {
    DialogueNaturalness,
    TerminologyConsistency,
    CharacterVoice,
    CulturalAdaptation,
}

impl QualityMetric {
    pub const ALL: [Self; 4] = [
        Self::DialogueNaturalness,
        Self::TerminologyConsistency,
        Self::CharacterVoice,
        Self::CulturalAdaptation,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DialogueNaturalness => "dialogue_naturalness",
            Self::TerminologyConsistency => "terminology_consistency",
            Self::CharacterVoice => "character_voice",
            Self::CulturalAdaptation => "cultural_adaptation",
        }
    }
}

impl fmt::Display for QualityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One number per quality metric. Used for scores, weights and minimums.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    pub dialogue_naturalness: f64,
    pub terminology_consistency: f64,
    pub character_voice: f64,
    pub cultural_adaptation: f64,
}

impl MetricValues {
    #[must_use]
    pub fn get(&self, metric: QualityMetric) -> f64 {
        match metric {
            QualityMetric::DialogueNaturalness => self.dialogue_naturalness,
            QualityMetric::TerminologyConsistency => self.terminology_consistency,
            QualityMetric::CharacterVoice => self.character_voice,
            QualityMetric::CulturalAdaptation => self.cultural_adaptation,
        }
    }

    /// Weighted sum; the weights are not normalised.
    #[must_use]
    pub fn weighted_by(&self, weights: &MetricValues) -> f64 {
        QualityMetric::ALL
            .iter()
            .map(|&m| self.get(m) * weights.get(m))
            .sum()
    }
}

fn default_weights() -> MetricValues {
    MetricValues {
        dialogue_naturalness: 0.30,
        terminology_consistency: 0.25,
        character_voice: 0.25,
        cultural_adaptation: 0.20,
    }
}

fn default_thresholds() -> MetricValues {
    MetricValues {
        dialogue_naturalness: 80.0,
        terminology_consistency: 90.0,
        character_voice: 85.0,
        cultural_adaptation: 75.0,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_weights")]
    pub weights: MetricValues,
    /// Per-metric minimums below which a recommendation is emitted.
    #[serde(default = "default_thresholds")]
    pub thresholds: MetricValues,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            thresholds: default_thresholds(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub scores: MetricValues,
    pub overall_score: f64,
    pub recommendations: Vec<String>,
    pub original_lines: LineStats,
    pub translated_lines: LineStats,
    pub readability: ReadabilityStats,
}

impl ValidationResult {
    #[must_use]
    pub fn count(&self, category: IssueCategory) -> usize {
        self.issues.iter().filter(|i| i.category == category).count()
    }

    #[must_use]
    pub fn count_severity(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Human-readable report.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Validation: {} (overall {:.1}/100)\n",
            if self.is_valid { "PASSED" } else { "FAILED" },
            self.overall_score
        ));
        out.push_str("Scores:\n");
        for m in QualityMetric::ALL {
            out.push_str(&format!("  {:<24} {:>5.1}\n", m.as_str(), self.scores.get(m)));
        }
        out.push_str(&format!(
            "Lines: original {} content / {} empty, translated {} content / {} empty\n",
            self.original_lines.content_lines,
            self.original_lines.empty_lines,
            self.translated_lines.content_lines,
            self.translated_lines.empty_lines
        ));
        out.push_str(&format!(
            "Readability: {:.1} ({} sentences, {:.1} words avg)\n",
            self.readability.index, self.readability.sentences, self.readability.avg_sentence_words
        ));
        if !self.issues.is_empty() {
            out.push_str(&format!("Issues ({}):\n", self.issues.len()));
            let mut sorted: Vec<&ValidationIssue> = self.issues.iter().collect();
            sorted.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.line.cmp(&b.line)));
            for issue in sorted {
                out.push_str(&format!(
                    "  [{}] line {} {}: {}",
                    issue.severity.as_str(),
                    issue.line,
                    issue.category.as_str(),
                    issue.message
                ));
                if let Some(s) = issue.suggestion.as_deref() {
                    out.push_str(&format!(" (try: {s})"));
                }
                out.push('\n');
                if !issue.context.is_empty() {
                    out.push_str(&format!("      …{}…\n", issue.context));
                }
            }
        }
        if !self.recommendations.is_empty() {
            out.push_str("Recommendations:\n");
            for r in &self.recommendations {
                out.push_str("  - ");
                out.push_str(r);
                out.push('\n');
            }
        }
        out
    }
}

/// Heuristic score of one resolved segment, always within `0..=100`.
pub fn segment_quality_score(text: &str, rules: &RuleTables) -> f32 {
    let mut score: i64 = 80;
    let len = text.chars().count();
    if len < 10 {
        score -= 20;
    } else if len > 500 {
        score -= 10;
    }
    let lower = text.to_lowercase();
    let archaisms = rules
        .archaisms
        .iter()
        .filter(|w| !w.is_empty() && lower.contains(&w.to_lowercase()))
        .count() as i64;
    let natural = rules
        .natural_markers
        .iter()
        .filter(|m| !m.is_empty() && text.contains(m.as_str()))
        .count() as i64;
    score = score - archaisms * 5 + natural * 2;
    score.clamp(0, 100) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_score_bounds() {
        let rules = RuleTables::default();
        assert_eq!(segment_quality_score("", &rules), 60.0);
        let long = "весьма дабы ибо сей ".repeat(600);
        let s = segment_quality_score(&long, &rules);
        assert!((0.0..=100.0).contains(&s));
        let natural = "Дай мне это. Можешь? Хочу. Похоже, да.".repeat(30);
        assert!(segment_quality_score(&natural, &rules) <= 100.0);
    }

    #[test]
    fn segment_score_counts_markers() {
        let rules = RuleTables::default();
        assert_eq!(segment_quality_score("Дай мне меч, ладно?", &rules), 82.0);
        assert_eq!(segment_quality_score("Сей меч весьма хорош.", &rules), 70.0);
    }

    #[test]
    fn default_weights_sum_to_one() {
        let w = QualityConfig::default().weights;
        let sum: f64 = QualityMetric::ALL.iter().map(|&m| w.get(m)).sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
