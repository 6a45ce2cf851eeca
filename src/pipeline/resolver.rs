//! Per-segment translation: lookup order, fallback to the translate
//! capability, fixed post-processing and write-back to memory.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::{Captures, Regex};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::character::{CharacterClassifier, CharacterKind, Classification};
use crate::memory::{TranslationMemory, TranslationRecord};
use crate::progress::RunProgress;
use crate::quality::segment_quality_score;
use crate::reference::{word_regex, ReferenceData};
use crate::segmenter::{pack_by_budget, Segment};
use crate::textutil::match_leading_case;
use crate::translate::{BatchRunner, TranslationOutcome, Translator};

/// Classifier output below this is not trusted for style adaptation.
const STYLE_MIN_CONFIDENCE: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationSource {
    Cache,
    ReferenceBase,
    Memory,
    Api,
}

impl TranslationSource {
    pub const ALL: [Self; 4] = [Self::Cache, Self::ReferenceBase, Self::Memory, Self::Api];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::ReferenceBase => "reference_base",
            Self::Memory => "memory",
            Self::Api => "api",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedTranslation {
    pub text: String,
    pub source: TranslationSource,
    pub confidence: f32,
    pub quality_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character: Option<CharacterKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolvedTranslation {
    fn failed(source: TranslationSource, message: String, character: Option<CharacterKind>) -> Self {
        Self {
            text: String::new(),
            source,
            confidence: 0.0,
            quality_score: 0.0,
            character,
            error: Some(message),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// What the caller declares about the chapter being translated.
#[derive(Clone, Debug, Default)]
pub struct ResolveContext {
    pub chapter: String,
    pub style: String,
    pub scene: Option<String>,
    pub tone: Option<String>,
}

impl ResolveContext {
    pub fn new(chapter: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            chapter: chapter.into(),
            style: style.into(),
            scene: None,
            tone: None,
        }
    }

    #[must_use]
    pub fn with_scene(mut self, scene: Option<String>) -> Self {
        self.scene = scene.filter(|s| !s.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_tone(mut self, tone: Option<String>) -> Self {
        self.tone = tone.filter(|s| !s.trim().is_empty());
        self
    }
}

#[derive(Clone, Debug)]
pub struct ResolverSettings {
    pub similarity_threshold: f32,
    pub source_lang: String,
    pub target_lang: String,
    pub batch_chars: usize,
    pub max_concurrent: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            source_lang: "EN".to_string(),
            target_lang: "RU".to_string(),
            batch_chars: 1000,
            max_concurrent: 10,
        }
    }
}

/// Base translation found before post-processing.
struct Base {
    text: String,
    source: TranslationSource,
    confidence: f32,
}

enum Lookup {
    Done(ResolvedTranslation),
    Found(Base),
    Pending,
}

type StyleRules = Vec<(CharacterKind, Vec<(Regex, String)>)>;

pub struct SegmentResolver {
    reference: Arc<ReferenceData>,
    classifier: CharacterClassifier,
    memory: Arc<TranslationMemory>,
    runner: BatchRunner,
    settings: ResolverSettings,
    cache: RwLock<HashMap<(String, String), ResolvedTranslation>>,
    style_rules: StyleRules,
}

impl SegmentResolver {
    pub fn new(
        reference: Arc<ReferenceData>,
        memory: Arc<TranslationMemory>,
        translator: Arc<dyn Translator>,
        settings: ResolverSettings,
    ) -> Self {
        let runner = BatchRunner::new(
            translator,
            settings.max_concurrent,
            settings.source_lang.clone(),
            settings.target_lang.clone(),
        );
        let style_rules = compile_style_rules(&reference);
        Self {
            classifier: reference.classifier(),
            reference,
            memory,
            runner,
            settings,
            cache: RwLock::new(HashMap::new()),
            style_rules,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<RunProgress>) -> Self {
        self.runner = self.runner.with_progress(progress);
        self
    }

    #[must_use]
    pub fn translator_name(&self) -> &str {
        self.runner.translator_name()
    }

    #[must_use]
    pub fn memory(&self) -> &TranslationMemory {
        &self.memory
    }

    #[must_use]
    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub async fn resolve(&self, segment: &Segment, ctx: &ResolveContext) -> ResolvedTranslation {
        self.resolve_all(std::slice::from_ref(segment), ctx, &CancellationToken::new())
            .await
            .pop()
            .unwrap_or_else(|| {
                ResolvedTranslation::failed(TranslationSource::Api, "no result".to_string(), None)
            })
    }

    /// Resolve every segment, results in input order.
    ///
    /// Lookups run first; the remaining texts are deduplicated, packed into
    /// `batch_chars` batches and translated concurrently; post-processing,
    /// caching and memory writes then happen in input order.
    pub async fn resolve_all(
        &self,
        segments: &[Segment],
        ctx: &ResolveContext,
        cancel: &CancellationToken,
    ) -> Vec<ResolvedTranslation> {
        let lookups: Vec<Lookup> = segments.iter().map(|s| self.lookup(s, ctx)).collect();

        let mut pending: Vec<&str> = Vec::new();
        let mut pending_slot: HashMap<&str, usize> = HashMap::new();
        for (seg, lookup) in segments.iter().zip(&lookups) {
            if matches!(lookup, Lookup::Pending) && !pending_slot.contains_key(seg.content.as_str()) {
                pending_slot.insert(seg.content.as_str(), pending.len());
                pending.push(seg.content.as_str());
            }
        }
        let fetched = self.fetch(&pending, cancel).await;

        let mut results = Vec::with_capacity(segments.len());
        let mut records = Vec::new();
        for (seg, lookup) in segments.iter().zip(lookups) {
            // an earlier copy of this text in the same call has been finished
            if !matches!(lookup, Lookup::Done(_)) {
                if let Some(hit) = self.cached(&seg.content, &ctx.style) {
                    results.push(hit);
                    continue;
                }
            }
            let base = match lookup {
                Lookup::Done(r) => {
                    results.push(r);
                    continue;
                }
                Lookup::Found(base) => Ok(base),
                Lookup::Pending => {
                    let outcome = pending_slot
                        .get(seg.content.as_str())
                        .and_then(|&slot| fetched.get(slot));
                    match outcome {
                        Some(o) if o.success => Ok(Base {
                            text: o.text.clone(),
                            source: TranslationSource::Api,
                            confidence: 0.8,
                        }),
                        Some(o) => Err(o
                            .error_message
                            .clone()
                            .unwrap_or_else(|| "translate failed".to_string())),
                        None => Err("missing translate result".to_string()),
                    }
                }
            };
            let who = self.classify(seg);
            let character = who.kind.is_person().then_some(who.kind);
            let resolved = match base {
                Ok(base) => self.finish(seg, base, who, ctx, &mut records),
                Err(message) => {
                    tracing::warn!(line = seg.line, error = %message, "segment unresolved");
                    ResolvedTranslation::failed(TranslationSource::Api, message, character)
                }
            };
            results.push(resolved);
        }

        if !records.is_empty() {
            self.persist(records).await;
        }
        results
    }

    /// Memory writes touch storage, so they run on the blocking pool. A
    /// failed write has already switched the memory to no-memory mode.
    async fn persist(&self, records: Vec<TranslationRecord>) {
        let memory = Arc::clone(&self.memory);
        match tokio::task::spawn_blocking(move || memory.insert_many(records)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "memory write dropped"),
            Err(e) => tracing::warn!(error = %e, "memory write task failed; results kept"),
        }
    }

    /// Steps 1 to 4 of the lookup order.
    fn lookup(&self, seg: &Segment, ctx: &ResolveContext) -> Lookup {
        if seg.is_empty_line() {
            return Lookup::Done(ResolvedTranslation {
                text: seg.content.clone(),
                source: TranslationSource::Cache,
                confidence: 1.0,
                quality_score: 100.0,
                character: None,
                error: None,
            });
        }
        if let Some(hit) = self.cached(&seg.content, &ctx.style) {
            return Lookup::Done(hit);
        }
        if let Some(phrase) = self.reference.phrase_for(&seg.content, Some(&ctx.chapter)) {
            return Lookup::Found(Base {
                text: phrase.to_string(),
                source: TranslationSource::ReferenceBase,
                confidence: 1.0,
            });
        }
        match self.memory.find_exact(&seg.content, Some(&ctx.chapter)) {
            Ok(Some(target)) => {
                return Lookup::Found(Base {
                    text: target,
                    source: TranslationSource::Memory,
                    confidence: 1.0,
                })
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "memory exact lookup failed; treating as miss"),
        }
        match self
            .memory
            .find_similar(&seg.content, self.settings.similarity_threshold, 1)
        {
            Ok(mut hits) if !hits.is_empty() => {
                let best = hits.swap_remove(0);
                Lookup::Found(Base {
                    text: best.record.target_text,
                    source: TranslationSource::Memory,
                    confidence: best.similarity,
                })
            }
            Ok(_) => Lookup::Pending,
            Err(e) => {
                tracing::warn!(error = %e, "memory similarity lookup failed; treating as miss");
                Lookup::Pending
            }
        }
    }

    async fn fetch(&self, texts: &[&str], cancel: &CancellationToken) -> Vec<TranslationOutcome> {
        if texts.is_empty() {
            return Vec::new();
        }
        let groups = pack_by_budget(
            texts.iter().enumerate().map(|(i, t)| (i, t.chars().count())),
            self.settings.batch_chars.max(1),
        );
        let batches: Vec<Vec<String>> = groups
            .iter()
            .map(|g| g.iter().map(|&i| texts[i].to_string()).collect())
            .collect();
        tracing::debug!(texts = texts.len(), batches = batches.len(), "translating misses");
        let outcomes = self.runner.run(&batches, cancel).await;

        let mut out = vec![TranslationOutcome::failed("missing translate result"); texts.len()];
        for (group, batch) in groups.into_iter().zip(outcomes) {
            for (i, outcome) in group.into_iter().zip(batch) {
                out[i] = outcome;
            }
        }
        out
    }

    fn classify(&self, seg: &Segment) -> Classification {
        match seg.character {
            Some(kind) => Classification {
                kind,
                confidence: 1.0,
            },
            None => self.classifier.classify(&seg.content),
        }
    }

    fn finish(
        &self,
        seg: &Segment,
        base: Base,
        who: Classification,
        ctx: &ResolveContext,
        records: &mut Vec<TranslationRecord>,
    ) -> ResolvedTranslation {
        let text = self.post_process(&base.text, who, ctx);
        let quality_score = segment_quality_score(&text, &self.reference.rules().tables);
        let character = who.kind.is_person().then_some(who.kind);
        let resolved = ResolvedTranslation {
            text,
            source: base.source,
            confidence: base.confidence.clamp(0.0, 1.0),
            quality_score,
            character,
            error: None,
        };
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((seg.content.clone(), ctx.style.clone()), resolved.clone());
        records.push(
            TranslationRecord::new(seg.content.clone(), resolved.text.clone(), ctx.chapter.clone())
                .with_character(character)
                .with_context(ctx.scene.clone())
                .with_quality(quality_score),
        );
        resolved
    }

    fn cached(&self, text: &str, style: &str) -> Option<ResolvedTranslation> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache
            .get(&(text.to_string(), style.to_string()))
            .map(|r| ResolvedTranslation {
                source: TranslationSource::Cache,
                confidence: 0.9,
                ..r.clone()
            })
    }

    /// Glossary, then forbidden words, then character style, then scene and
    /// tone tables. The order changes the output.
    pub fn post_process(&self, base: &str, who: Classification, ctx: &ResolveContext) -> String {
        let mut text = self.reference.glossary().substitute(base).into_owned();

        for (word, re) in self.reference.forbidden_matchers() {
            if !re.is_match(&text) {
                continue;
            }
            let alt = self.reference.preferred_alternative(word);
            tracing::warn!(word = %word, replacement = %alt, "forbidden word replaced");
            if alt != word {
                text = re
                    .replace_all(&text, |caps: &Captures<'_>| match_leading_case(&caps[0], alt))
                    .into_owned();
            }
        }

        if who.kind.is_person() && who.confidence >= STYLE_MIN_CONFIDENCE {
            if let Some((_, rules)) = self.style_rules.iter().find(|(k, _)| *k == who.kind) {
                for (re, replacement) in rules {
                    text = re
                        .replace_all(&text, |caps: &Captures<'_>| {
                            match_leading_case(&caps[0], replacement)
                        })
                        .into_owned();
                }
            }
        }

        let tables = [
            ctx.scene.as_deref().and_then(|s| self.reference.scene_table(s)),
            ctx.tone.as_deref().and_then(|t| self.reference.tone_table(t)),
        ];
        for table in tables.into_iter().flatten() {
            for (from, to) in table {
                if !from.is_empty() {
                    text = text.replace(from.as_str(), to);
                }
            }
        }
        text
    }
}

/// Avoided word matchers per person, with the profile's own substitute or the
/// forbidden-word alternative.
fn compile_style_rules(reference: &ReferenceData) -> StyleRules {
    reference
        .roster()
        .profiles()
        .iter()
        .filter(|p| p.kind.is_person())
        .map(|p| {
            let rules = p
                .avoid
                .iter()
                .filter_map(|word| {
                    let replacement = p
                        .replacements
                        .get(word)
                        .map(String::as_str)
                        .unwrap_or_else(|| reference.preferred_alternative(word));
                    if replacement == word {
                        return None;
                    }
                    match word_regex(word, true) {
                        Ok(re) => Some((re, replacement.to_string())),
                        Err(e) => {
                            tracing::warn!(error = %e, character = %p.kind, "style rule skipped");
                            None
                        }
                    }
                })
                .collect();
            (p.kind, rules)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::SimilarityBackendKind;
    use crate::segmenter::SegmentMode;
    use crate::translate::testing::MockTranslator;

    fn reference() -> Arc<ReferenceData> {
        Arc::new(ReferenceData::builtin().expect("builtin reference"))
    }

    fn resolver_with(
        reference: Arc<ReferenceData>,
        memory: Arc<TranslationMemory>,
        mock: Arc<MockTranslator>,
    ) -> SegmentResolver {
        SegmentResolver::new(reference, memory, mock, ResolverSettings::default())
    }

    fn segments(reference: &ReferenceData, text: &str) -> Vec<Segment> {
        reference.segmenter().segment(text, SegmentMode::Lines)
    }

    fn ctx() -> ResolveContext {
        ResolveContext::new("chapter_1", "modern_web_novel")
    }

    #[tokio::test]
    async fn api_result_is_persisted_once() {
        let reference = Arc::new(ReferenceData::empty());
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        let mock = Arc::new(MockTranslator::with(&[("Hello, world!", "Привет, мир!")]));
        let resolver = resolver_with(reference.clone(), memory.clone(), mock.clone());

        let seg = segments(&reference, "Hello, world!").remove(0);
        let r = resolver.resolve(&seg, &ctx()).await;
        assert_eq!(r.source, TranslationSource::Api);
        assert_eq!(r.text, "Привет, мир!");
        assert_eq!(r.confidence, 0.8);
        assert!(r.error.is_none());

        let records = memory.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_text, "Hello, world!");
        assert_eq!(records[0].target_text, "Привет, мир!");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn repeated_segment_comes_from_cache() {
        let reference = Arc::new(ReferenceData::empty());
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        let mock = Arc::new(MockTranslator::with(&[("He left.", "Он ушёл.")]));
        let resolver = resolver_with(reference.clone(), memory.clone(), mock.clone());
        let seg = segments(&reference, "He left.").remove(0);

        let first = resolver.resolve(&seg, &ctx()).await;
        let second = resolver.resolve(&seg, &ctx()).await;
        assert_eq!(first.source, TranslationSource::Api);
        assert_eq!(second.source, TranslationSource::Cache);
        assert_eq!(second.confidence, 0.9);
        assert_eq!(second.text, first.text);
        assert_eq!(mock.calls(), 1);
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn empty_lines_pass_through_untouched() {
        let reference = Arc::new(ReferenceData::empty());
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        let mock = Arc::new(MockTranslator::default());
        let resolver = resolver_with(reference.clone(), memory.clone(), mock.clone());
        let segs = segments(&reference, "  \n");
        let out = resolver.resolve_all(&segs, &ctx(), &CancellationToken::new()).await;
        assert_eq!(out[0].text, "  ");
        assert_eq!(out[0].confidence, 1.0);
        assert_eq!(mock.calls(), 0);
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn reference_phrase_beats_memory_and_api() {
        let reference = reference();
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        memory
            .insert(TranslationRecord::new("Ding!", "Дзынь!", "chapter_1"))
            .expect("seed");
        let mock = Arc::new(MockTranslator::default());
        let resolver = resolver_with(reference.clone(), memory, mock.clone());
        let seg = segments(&reference, "Ding!").remove(0);
        let r = resolver.resolve(&seg, &ctx()).await;
        assert_eq!(r.source, TranslationSource::ReferenceBase);
        assert_eq!(r.text, "Динь!");
        assert_eq!(r.confidence, 1.0);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn fuzzy_memory_match_carries_similarity() {
        let reference = Arc::new(ReferenceData::empty());
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        memory
            .insert(TranslationRecord::new(
                "the old man smiled at the boy",
                "старик улыбнулся мальчику",
                "chapter_0",
            ))
            .expect("seed");
        let mock = Arc::new(MockTranslator::default());
        let resolver = SegmentResolver::new(
            reference.clone(),
            memory,
            mock.clone(),
            ResolverSettings {
                similarity_threshold: 0.5,
                ..ResolverSettings::default()
            },
        );
        let seg = segments(&reference, "the old man smiled at a boy").remove(0);
        let r = resolver.resolve(&seg, &ctx()).await;
        assert_eq!(r.source, TranslationSource::Memory);
        assert_eq!(r.text, "старик улыбнулся мальчику");
        assert!(r.confidence >= 0.5 && r.confidence < 1.0);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn translate_failure_yields_error_result() {
        let reference = Arc::new(ReferenceData::empty());
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        let mock = Arc::new(MockTranslator {
            fail_on: Some("Broken line".into()),
            ..MockTranslator::default()
        });
        let resolver = resolver_with(reference.clone(), memory.clone(), mock);
        let segs = segments(&reference, "Broken line");
        let out = resolver.resolve_all(&segs, &ctx(), &CancellationToken::new()).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].is_error());
        assert_eq!(out[0].text, "");
        assert_eq!(out[0].confidence, 0.0);
        assert!(memory.is_empty());

        // errors are not cached: a later call retries the capability
        let again = resolver.resolve(&segs[0], &ctx()).await;
        assert!(again.is_error());
        assert_eq!(again.source, TranslationSource::Api);
    }

    #[tokio::test]
    async fn cancellation_keeps_resolved_segments() {
        let reference = reference();
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        let mock = Arc::new(MockTranslator {
            delay: Some(Duration::from_secs(30)),
            ..MockTranslator::default()
        });
        let resolver = resolver_with(reference.clone(), memory, mock);
        let segs = segments(&reference, "Ding!\n\nSomething slow");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = tokio::time::timeout(
            Duration::from_secs(5),
            resolver.resolve_all(&segs, &ctx(), &cancel),
        )
        .await
        .expect("cancelled run returns promptly");
        assert_eq!(out[0].text, "Динь!");
        assert_eq!(out[1].text, "");
        assert!(out[1].error.is_none());
        assert_eq!(out[2].error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn duplicate_misses_are_translated_once_and_ordered() {
        let reference = Arc::new(ReferenceData::empty());
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        let mock = Arc::new(MockTranslator::with(&[("One.", "Один."), ("Two.", "Два.")]));
        let resolver = SegmentResolver::new(
            reference.clone(),
            memory.clone(),
            mock.clone(),
            ResolverSettings {
                batch_chars: 4,
                ..ResolverSettings::default()
            },
        );
        let segs = segments(&reference, "One.\nTwo.\nOne.");
        let out = resolver.resolve_all(&segs, &ctx(), &CancellationToken::new()).await;
        let texts: Vec<&str> = out.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Один.", "Два.", "Один."]);
        assert_eq!(mock.seen.lock().expect("lock").len(), 2);
        assert_eq!(mock.calls(), 2);

        // the later copy is served like a sequential repeat: from the cache
        let sources: Vec<TranslationSource> = out.iter().map(|r| r.source).collect();
        assert_eq!(
            sources,
            vec![TranslationSource::Api, TranslationSource::Api, TranslationSource::Cache]
        );
        assert_eq!(out[2].confidence, 0.9);
        assert_eq!(out[2], resolver.resolve(&segs[2], &ctx()).await);
        assert_eq!(memory.len(), 2);
    }

    #[tokio::test]
    async fn capitalised_forbidden_word_does_not_fail_validation() {
        let reference = reference();
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        let mock = Arc::new(MockTranslator::with(&[(
            "He was very pleased.",
            "Весьма доволен он был.",
        )]));
        let resolver = resolver_with(reference.clone(), memory, mock);
        let seg = segments(&reference, "He was very pleased.").remove(0);
        let r = resolver.resolve(&seg, &ctx()).await;
        assert_eq!(r.text, "Очень доволен он был.");

        let validation = crate::quality::ChapterValidator::new(reference)
            .validate("He was very pleased.", &r.text);
        assert_eq!(validation.count(crate::quality::IssueCategory::Archaism), 0);
    }

    #[tokio::test]
    async fn memory_write_failure_keeps_results_and_stops_lookups() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("memory.json");
        let memory = Arc::new(
            TranslationMemory::open(&path, SimilarityBackendKind::TokenOverlap).expect("open"),
        );
        std::fs::create_dir(dir.path().join("memory.json.tmp")).expect("block tmp");
        let reference = Arc::new(ReferenceData::empty());
        let mock = Arc::new(MockTranslator::with(&[("Hello", "Привет")]));
        let resolver = resolver_with(reference.clone(), memory.clone(), mock);

        let seg = segments(&reference, "Hello").remove(0);
        let r = resolver.resolve(&seg, &ctx()).await;
        assert_eq!(r.text, "Привет");
        assert!(!memory.is_enabled());
        assert_eq!(memory.find_exact("Hello", None).expect("lookup"), None);
    }

    #[tokio::test]
    async fn identical_inputs_resolve_identically() {
        let text = "Jiang Chen yawned.\n\n\"Ding!\"\nThe Holy Son arrived.";
        let mut runs = Vec::new();
        for _ in 0..2 {
            let reference = reference();
            let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
            let mock = Arc::new(MockTranslator::default());
            let resolver = resolver_with(reference.clone(), memory, mock);
            let segs = segments(&reference, text);
            runs.push(resolver.resolve_all(&segs, &ctx(), &CancellationToken::new()).await);
        }
        assert_eq!(runs[0], runs[1]);
    }

    const ORDER_REFERENCE: &str = r#"{
        "glossary_terms": {"titles": {"Holy Son": "Святой Сын"}},
        "translation_errors": {
            "forbidden_words": ["сей"],
            "preferred_alternatives": {"сей": "этот, данный"}
        },
        "characters": [{
            "kind": "Jiang_Chen",
            "name": "Цзян Чэнь",
            "aliases": ["Jiang Chen"],
            "avoid": ["однако", "этот"],
            "replacements": {"однако": "но", "этот": "вот этот"}
        }],
        "scene_adaptations": {"боевая": {"вот этот": "тот самый"}}
    }"#;

    #[test]
    fn post_processing_runs_in_fixed_order() {
        let reference = Arc::new(ReferenceData::from_json_str(ORDER_REFERENCE).expect("reference"));
        let memory = Arc::new(TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap));
        let resolver = resolver_with(reference, memory, Arc::new(MockTranslator::default()));
        let sure = Classification {
            kind: CharacterKind::JiangChen,
            confidence: 1.0,
        };
        let unsure = Classification {
            kind: CharacterKind::JiangChen,
            confidence: 0.2,
        };
        let battle = ResolveContext::new("chapter_1", "modern_web_novel")
            .with_scene(Some("боевая".into()));
        let plain = ResolveContext::new("chapter_1", "modern_web_novel");

        // glossary, forbidden word, style words, then the scene table
        let out = resolver.post_process("Holy Son: сей меч, однако", sure, &battle);
        assert_eq!(out, "Святой Сын: тот самый меч, но");

        // an unusable classification skips only the style step
        let out = resolver.post_process("Holy Son: сей меч, однако", unsure, &plain);
        assert_eq!(out, "Святой Сын: этот меч, однако");

        // a capitalised match keeps its capital
        let out = resolver.post_process("Однако сей меч", sure, &plain);
        assert_eq!(out, "Но вот этот меч");
        let out = resolver.post_process("Сей меч", unsure, &plain);
        assert_eq!(out, "Этот меч");

        // word-bounded: «сейчас» is not «сей»
        let out = resolver.post_process("сейчас", unsure, &plain);
        assert_eq!(out, "сейчас");
    }
}
