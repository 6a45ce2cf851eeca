use serde::Serialize;

use crate::reference::CompiledRules;
use crate::textutil::{sentence_spans, word_count};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReadabilityStats {
    pub sentences: usize,
    pub avg_sentence_words: f64,
    pub long_sentence_pct: f64,
    pub archaisms: usize,
    /// 100 minus penalties for sentence length, long sentences and
    /// archaisms, clamped to `0..=100`.
    pub index: f64,
}

impl ReadabilityStats {
    pub fn of(text: &str, rules: &CompiledRules) -> Self {
        let sentences = sentence_spans(text);
        let archaisms: usize = rules
            .archaisms
            .iter()
            .map(|(_, re)| re.find_iter(text).count())
            .sum();
        if sentences.is_empty() {
            return Self {
                archaisms,
                index: (100.0 - archaisms as f64 * 5.0).clamp(0.0, 100.0),
                ..Self::default()
            };
        }
        let max_words = rules.tables.max_sentence_words;
        let lengths: Vec<usize> = sentences.iter().map(|s| word_count(s.text)).collect();
        let total: usize = lengths.iter().sum();
        let long = lengths.iter().filter(|&&n| n > max_words).count();
        let avg = total as f64 / lengths.len() as f64;
        let long_pct = long as f64 / lengths.len() as f64 * 100.0;
        let index = 100.0 - avg * 2.0 - archaisms as f64 * 5.0 - long_pct * 0.5;
        Self {
            sentences: lengths.len(),
            avg_sentence_words: avg,
            long_sentence_pct: long_pct,
            archaisms,
            index: index.clamp(0.0, 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_clean_sentences_read_well() {
        let rules = CompiledRules::default();
        let r = ReadabilityStats::of("Он встал. Она ушла. Всё.", &rules);
        assert_eq!(r.sentences, 3);
        assert!((r.avg_sentence_words - 5.0 / 3.0).abs() < 1e-9);
        assert_eq!(r.archaisms, 0);
        assert!(r.index > 90.0);
    }

    #[test]
    fn archaisms_and_long_sentences_cost() {
        let rules = CompiledRules::default();
        let long = vec!["слово"; 20].join(" ");
        let text = format!("{long}. Сей день весьма хорош.");
        let r = ReadabilityStats::of(&text, &rules);
        assert_eq!(r.archaisms, 2);
        assert!((r.long_sentence_pct - 50.0).abs() < 1e-9);
        assert!(r.index < 70.0);
        assert!(r.index >= 0.0);
    }
}
