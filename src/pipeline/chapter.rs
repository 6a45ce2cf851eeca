//! Whole-chapter run: segment, resolve, reassemble, validate.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::character::{CharacterClassifier, CharacterKind, CharacterTally};
use crate::pipeline::resolver::{
    ResolveContext, ResolvedTranslation, SegmentResolver, TranslationSource,
};
use crate::pipeline::trace::TraceWriter;
use crate::progress::RunProgress;
use crate::quality::{ChapterValidator, ValidationResult};
use crate::reference::ReferenceData;
use crate::segmenter::{reassemble, Segment, SegmentMode, Segmenter};

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunStats {
    pub total_segments: usize,
    pub empty_lines: usize,
    pub by_source: BTreeMap<TranslationSource, usize>,
    pub errors: usize,
    /// Share of non-empty segments served from translation memory.
    pub memory_hit_rate: f64,
    /// Mean quality score over non-empty, successfully resolved segments.
    pub avg_quality: f64,
    pub translators_used: Vec<String>,
    pub characters: BTreeMap<CharacterKind, CharacterTally>,
    pub elapsed_secs: f64,
}

impl RunStats {
    pub fn compute(
        segments: &[Segment],
        results: &[ResolvedTranslation],
        translator: &str,
        characters: BTreeMap<CharacterKind, CharacterTally>,
    ) -> Self {
        let mut stats = Self {
            total_segments: segments.len(),
            characters,
            ..Self::default()
        };
        let mut quality_sum = 0.0f64;
        let mut quality_n = 0usize;
        for (seg, res) in segments.iter().zip(results) {
            if seg.is_empty_line() {
                stats.empty_lines += 1;
                continue;
            }
            if res.is_error() {
                stats.errors += 1;
                continue;
            }
            *stats.by_source.entry(res.source).or_default() += 1;
            quality_sum += f64::from(res.quality_score);
            quality_n += 1;
        }
        let non_empty = stats.total_segments - stats.empty_lines;
        if non_empty > 0 {
            let memory = stats.count(TranslationSource::Memory);
            stats.memory_hit_rate = memory as f64 / non_empty as f64;
        }
        if quality_n > 0 {
            stats.avg_quality = quality_sum / quality_n as f64;
        }
        if stats.count(TranslationSource::Api) > 0 || stats.errors > 0 {
            stats.translators_used.push(translator.to_string());
        }
        stats
    }

    #[must_use]
    pub fn count(&self, source: TranslationSource) -> usize {
        self.by_source.get(&source).copied().unwrap_or(0)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "segments: {} ({} empty lines, {} errors)",
            self.total_segments, self.empty_lines, self.errors
        );
        for source in TranslationSource::ALL {
            let _ = writeln!(out, "  {:<15} {}", source.as_str(), self.count(source));
        }
        let _ = writeln!(out, "memory hit rate: {:.1}%", self.memory_hit_rate * 100.0);
        let _ = writeln!(out, "average quality: {:.1}", self.avg_quality);
        if !self.translators_used.is_empty() {
            let _ = writeln!(out, "translators: {}", self.translators_used.join(", "));
        }
        for (kind, tally) in &self.characters {
            let _ = writeln!(
                out,
                "  {kind}: {} segments, {} dialogue, {} thoughts",
                tally.segments, tally.dialogue, tally.thoughts
            );
        }
        out
    }
}

pub struct ChapterTranslation {
    pub segments: Vec<Segment>,
    pub results: Vec<ResolvedTranslation>,
    pub text: String,
    pub validation: ValidationResult,
    pub stats: RunStats,
}

pub struct ChapterPipeline {
    segmenter: Segmenter,
    classifier: CharacterClassifier,
    resolver: SegmentResolver,
    validator: ChapterValidator,
    mode: SegmentMode,
    trace: TraceWriter,
    progress: Arc<RunProgress>,
}

impl ChapterPipeline {
    pub fn new(reference: Arc<ReferenceData>, resolver: SegmentResolver, mode: SegmentMode) -> Self {
        Self {
            segmenter: reference.segmenter(),
            classifier: reference.classifier(),
            validator: ChapterValidator::new(reference),
            resolver,
            mode,
            trace: TraceWriter::disabled(),
            progress: Arc::new(RunProgress::new(false)),
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<RunProgress>) -> Self {
        self.resolver = self.resolver.with_progress(progress.clone());
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn mode(&self) -> SegmentMode {
        self.mode
    }

    #[must_use]
    pub fn resolver(&self) -> &SegmentResolver {
        &self.resolver
    }

    pub fn segment(&self, text: &str) -> Vec<Segment> {
        self.segmenter.segment(text, self.mode)
    }

    pub fn validate(&self, original: &str, translated: &str) -> ValidationResult {
        self.validator.validate(original, translated)
    }

    pub async fn translate_chapter(
        &self,
        text: &str,
        ctx: &ResolveContext,
        cancel: &CancellationToken,
    ) -> ChapterTranslation {
        let segments = self.segment(text);
        self.progress.info(format!(
            "chapter {}: {} segments ({:?} mode)",
            ctx.chapter,
            segments.len(),
            self.mode
        ));
        self.trace_json("segments.json", &segments);

        let results = self.resolver.resolve_all(&segments, ctx, cancel).await;
        self.trace_json("resolved.json", &results);

        let text_out = reassemble_translation(&segments, &results, self.mode);
        let validation = self.validator.validate(text, &text_out);
        self.trace_json("validation.json", &validation);

        let mut stats = RunStats::compute(
            &segments,
            &results,
            self.resolver.translator_name(),
            self.classifier.statistics(&segments),
        );
        stats.elapsed_secs = self.progress.elapsed_secs();
        if stats.errors > 0 {
            tracing::warn!(
                errors = stats.errors,
                "some segments were not translated; source text kept in their place"
            );
        }
        self.progress.info(format!(
            "chapter {} done: score {:.1}, {} errors",
            ctx.chapter, validation.overall_score, stats.errors
        ));

        ChapterTranslation {
            segments,
            results,
            text: text_out,
            validation,
            stats,
        }
    }

    fn trace_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) {
        if let Err(e) = self.trace.write_json(name, value) {
            tracing::warn!(error = %e, artifact = name, "trace write failed");
        }
    }
}

/// Translated segments in source order. Empty lines keep their raw content
/// and failed segments keep their source text so the structure survives.
pub fn reassemble_translation(
    segments: &[Segment],
    results: &[ResolvedTranslation],
    mode: SegmentMode,
) -> String {
    let translated: Vec<Segment> = segments
        .iter()
        .zip(results)
        .map(|(seg, res)| {
            let content = if seg.is_empty_line() || res.is_error() {
                seg.content.clone()
            } else {
                res.text.clone()
            };
            Segment {
                content,
                ..seg.clone()
            }
        })
        .collect();
    reassemble(&translated, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{SimilarityBackendKind, TranslationMemory};
    use crate::pipeline::resolver::ResolverSettings;
    use crate::translate::testing::MockTranslator;

    fn pipeline(mock: MockTranslator, mode: SegmentMode) -> (ChapterPipeline, Arc<TranslationMemory>) {
        let reference = Arc::new(ReferenceData::builtin().expect("builtin"));
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        let resolver = SegmentResolver::new(
            reference.clone(),
            memory.clone(),
            Arc::new(mock),
            ResolverSettings::default(),
        );
        (ChapterPipeline::new(reference, resolver, mode), memory)
    }

    #[tokio::test]
    async fn line_structure_survives_translation() {
        let mock = MockTranslator::with(&[
            ("Jiang Chen opened his eyes.", "Цзян Чэнь открыл глаза."),
            ("He went back to sleep.", "Он снова уснул."),
        ]);
        let (p, memory) = pipeline(mock, SegmentMode::Lines);
        let src = "Jiang Chen opened his eyes.\r\n\r\nDing!\r\nHe went back to sleep.\r\n";
        let out = p
            .translate_chapter(src, &ResolveContext::new("chapter_1", "modern_web_novel"), &CancellationToken::new())
            .await;
        assert_eq!(
            out.text,
            "Цзян Чэнь открыл глаза.\r\n\r\nДинь!\r\nОн снова уснул.\r\n"
        );
        assert_eq!(out.segments.len(), out.results.len());
        assert_eq!(out.stats.count(TranslationSource::Api), 2);
        assert_eq!(out.stats.count(TranslationSource::ReferenceBase), 1);
        assert_eq!(out.stats.translators_used, vec!["mock".to_string()]);
        assert_eq!(memory.len(), 3);
        assert_eq!(out.validation.original_lines.total_lines, out.validation.translated_lines.total_lines);
    }

    #[tokio::test]
    async fn failed_segments_keep_source_text() {
        let mock = MockTranslator {
            fail_on: Some("Unlucky line".into()),
            ..MockTranslator::default()
        };
        let (p, _) = pipeline(mock, SegmentMode::Lines);
        let out = p
            .translate_chapter("Unlucky line", &ResolveContext::new("c", "s"), &CancellationToken::new())
            .await;
        assert_eq!(out.text, "Unlucky line");
        assert_eq!(out.stats.errors, 1);
        assert!(out.results[0].is_error());
    }

    #[tokio::test]
    async fn paragraph_mode_joins_with_blank_lines() {
        let (p, _) = pipeline(MockTranslator::default(), SegmentMode::Paragraphs);
        let out = p
            .translate_chapter("One\ntwo\n\n\nThree", &ResolveContext::new("c", "s"), &CancellationToken::new())
            .await;
        assert_eq!(out.segments.len(), 2);
        assert_eq!(out.text, "[ru] One\ntwo\n\n[ru] Three");
    }

    #[tokio::test]
    async fn trace_artifacts_are_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (p, _) = pipeline(MockTranslator::default(), SegmentMode::Lines);
        let p = p.with_trace(TraceWriter::new(dir.path().to_path_buf(), true).expect("trace"));
        p.translate_chapter("Hello", &ResolveContext::new("c", "s"), &CancellationToken::new())
            .await;
        for name in ["segments.json", "resolved.json", "validation.json"] {
            assert!(dir.path().join(name).exists(), "{name}");
        }
    }

    #[test]
    fn stats_skip_empty_lines_and_errors() {
        let seg = |content: &str, kind| Segment {
            content: content.to_string(),
            kind,
            line: 1,
            character: None,
            trailing_cr: false,
        };
        let ok = |source, q| ResolvedTranslation {
            text: "x".into(),
            source,
            confidence: 1.0,
            quality_score: q,
            character: None,
            error: None,
        };
        use crate::segmenter::SegmentKind::{Description, EmptyLine};
        let segments = vec![seg("a", Description), seg("", EmptyLine), seg("b", Description), seg("c", Description)];
        let mut failed = ok(TranslationSource::Api, 0.0);
        failed.error = Some("boom".into());
        let results = vec![
            ok(TranslationSource::Memory, 80.0),
            ok(TranslationSource::Cache, 100.0),
            ok(TranslationSource::Api, 60.0),
            failed,
        ];
        let stats = RunStats::compute(&segments, &results, "mock", BTreeMap::new());
        assert_eq!(stats.empty_lines, 1);
        assert_eq!(stats.errors, 1);
        assert!((stats.avg_quality - 70.0).abs() < 1e-9);
        assert!((stats.memory_hit_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!(stats.render().contains("memory hit rate: 33.3%"));
    }
}
