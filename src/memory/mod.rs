//! Translation memory: previously produced (source, target) pairs with exact
//! and fuzzy lookup.
//!
//! Records are keyed by a hash of (source text, chapter); inserting the same
//! key again overwrites the record in place, keeping its original slot so
//! similarity ties keep ranking by first insertion.

mod similarity;
mod storage;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::character::CharacterKind;
use crate::error::StoreError;

pub use similarity::{
    NgramEmbeddingIndex, SimilarityBackendKind, SimilarityIndex, TokenOverlap, EMBEDDING_DIMS,
};
pub use storage::{read_records, MemoryStorage, MEMORY_SCHEMA};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub id: String,
    pub source_text: String,
    pub target_text: String,
    pub chapter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<CharacterKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub quality_score: f32,
    pub timestamp: DateTime<Utc>,
}

impl TranslationRecord {
    pub fn new(
        source_text: impl Into<String>,
        target_text: impl Into<String>,
        chapter: impl Into<String>,
    ) -> Self {
        let source_text = source_text.into();
        let chapter = chapter.into();
        Self {
            id: record_id(&source_text, &chapter),
            source_text,
            target_text: target_text.into(),
            chapter,
            character: None,
            context: None,
            quality_score: 0.0,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_character(mut self, character: Option<CharacterKind>) -> Self {
        self.character = character;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_quality(mut self, score: f32) -> Self {
        self.quality_score = score.clamp(0.0, 100.0);
        self
    }
}

/// Stable id of a (source text, chapter) pair.
pub fn record_id(source_text: &str, chapter: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_text.as_bytes());
    hasher.update([0x1fu8]);
    hasher.update(chapter.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimilarMatch {
    pub record: TranslationRecord,
    pub similarity: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub total_records: usize,
    pub chapters: usize,
    pub characters: usize,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records, {} chapters, {} characters",
            self.total_records, self.chapters, self.characters
        )
    }
}

struct MemoryState {
    records: Vec<TranslationRecord>,
    by_id: HashMap<String, usize>,
    index: Box<dyn SimilarityIndex>,
    index_failed: bool,
}

impl MemoryState {
    fn new(backend: SimilarityBackendKind) -> Self {
        Self {
            records: Vec::new(),
            by_id: HashMap::new(),
            index: backend.build(),
            index_failed: false,
        }
    }

    fn upsert(&mut self, record: TranslationRecord) -> String {
        let id = record.id.clone();
        let slot = match self.by_id.get(&id) {
            Some(&slot) => {
                self.records[slot] = record;
                slot
            }
            None => {
                self.records.push(record);
                self.by_id.insert(id.clone(), self.records.len() - 1);
                self.records.len() - 1
            }
        };
        if !self.index_failed {
            if let Err(e) = self.index.insert(slot, &self.records[slot].source_text) {
                self.mark_index_failed(&e);
            }
        }
        id
    }

    fn mark_index_failed(&mut self, e: &StoreError) {
        if !self.index_failed {
            tracing::warn!(
                error = %e,
                backend = self.index.name(),
                "similarity index failed; falling back to token overlap"
            );
            self.index_failed = true;
        }
    }
}

pub struct TranslationMemory {
    state: RwLock<MemoryState>,
    storage: MemoryStorage,
    /// Serialises saves so an older snapshot never lands after a newer one.
    save_lock: Mutex<()>,
    /// Set after a failed save; the store then behaves as no-memory mode.
    degraded: AtomicBool,
}

impl TranslationMemory {
    pub fn new(storage: MemoryStorage, backend: SimilarityBackendKind) -> Result<Self, StoreError> {
        let mut state = MemoryState::new(backend);
        for r in storage.load()? {
            state.upsert(r);
        }
        Ok(Self::with_state(state, storage))
    }

    fn with_state(state: MemoryState, storage: MemoryStorage) -> Self {
        Self {
            state: RwLock::new(state),
            storage,
            save_lock: Mutex::new(()),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn in_memory(backend: SimilarityBackendKind) -> Self {
        Self::with_state(MemoryState::new(backend), MemoryStorage::InMemory)
    }

    /// No-memory mode.
    pub fn disabled() -> Self {
        Self::with_state(
            MemoryState::new(SimilarityBackendKind::TokenOverlap),
            MemoryStorage::Disabled,
        )
    }

    pub fn open(path: &Path, backend: SimilarityBackendKind) -> Result<Self, StoreError> {
        Self::new(MemoryStorage::JsonFile(path.to_path_buf()), backend)
    }

    /// Like [`TranslationMemory::open`], but an unreadable store yields
    /// no-memory mode.
    pub fn open_or_degrade(path: &Path, backend: SimilarityBackendKind) -> Self {
        match Self::open(path, backend) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "translation memory unavailable; continuing without memory"
                );
                Self::disabled()
            }
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.storage != MemoryStorage::Disabled && !self.degraded.load(Ordering::Acquire)
    }

    /// Switch to no-memory mode after a failed save. Records that never
    /// reached storage are dropped so later lookups miss.
    fn degrade(&self, e: &StoreError) {
        if self.degraded.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(
            error = %e,
            "translation memory write failed; continuing without memory"
        );
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.records.clear();
        state.by_id.clear();
    }

    #[must_use]
    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.records.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, record: TranslationRecord) -> Result<String, StoreError> {
        self.insert_many(std::iter::once(record))
            .map(|mut ids| ids.pop().unwrap_or_default())
    }

    /// Upsert all records, then persist once.
    ///
    /// The save runs on a snapshot, outside the state lock, so lookups are
    /// not held up by file I/O. A failed save puts the store into no-memory
    /// mode and returns the error.
    pub fn insert_many(
        &self,
        records: impl IntoIterator<Item = TranslationRecord>,
    ) -> Result<Vec<String>, StoreError> {
        if !self.is_enabled() {
            return Ok(records.into_iter().map(|r| r.id).collect());
        }
        let _saving = self.save_lock.lock().unwrap_or_else(|p| p.into_inner());
        let (ids, snapshot) = {
            let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
            let ids: Vec<String> = records.into_iter().map(|r| state.upsert(r)).collect();
            let snapshot = match self.storage {
                MemoryStorage::JsonFile(_) => state.records.clone(),
                MemoryStorage::InMemory | MemoryStorage::Disabled => Vec::new(),
            };
            (ids, snapshot)
        };
        if let Err(e) = self.storage.save(&snapshot) {
            self.degrade(&e);
            return Err(e);
        }
        Ok(ids)
    }

    /// Target text stored for `source`, looking in `chapter` first and then
    /// in every chapter by insertion order.
    pub fn find_exact(
        &self,
        source: &str,
        chapter: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        if let Some(c) = chapter {
            if let Some(&slot) = state.by_id.get(&record_id(source, c)) {
                return Ok(Some(state.records[slot].target_text.clone()));
            }
        }
        Ok(state
            .records
            .iter()
            .find(|r| r.source_text == source)
            .map(|r| r.target_text.clone()))
    }

    /// Records with similarity at least `threshold`, best first; ties keep
    /// insertion order.
    pub fn find_similar(
        &self,
        query: &str,
        threshold: f32,
        max_results: usize,
    ) -> Result<Vec<SimilarMatch>, StoreError> {
        if !self.is_enabled() || query.trim().is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }
        let scores = {
            let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
            if state.records.is_empty() {
                return Ok(Vec::new());
            }
            let sources: Vec<&str> = state.records.iter().map(|r| r.source_text.as_str()).collect();
            if state.index_failed {
                TokenOverlap.scores(query, &sources)?
            } else {
                match state.index.scores(query, &sources) {
                    Ok(s) => s,
                    Err(e) => {
                        let fallback = TokenOverlap.scores(query, &sources)?;
                        drop(state);
                        if let Ok(mut w) = self.state.write() {
                            w.mark_index_failed(&e);
                        }
                        fallback
                    }
                }
            }
        };

        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let mut hits: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter_map(|(slot, score)| {
                let record = state.records.get(slot)?;
                let score = if record.source_text == query { 1.0 } else { score };
                (score >= threshold).then_some((slot, score))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1));
        hits.truncate(max_results);
        Ok(hits
            .into_iter()
            .map(|(slot, similarity)| SimilarMatch {
                record: state.records[slot].clone(),
                similarity,
            })
            .collect())
    }

    pub fn stats(&self) -> MemoryStats {
        let Ok(state) = self.state.read() else {
            return MemoryStats::default();
        };
        let chapters: BTreeSet<&str> = state
            .records
            .iter()
            .map(|r| r.chapter.as_str())
            .filter(|c| !c.is_empty())
            .collect();
        let characters: BTreeSet<CharacterKind> =
            state.records.iter().filter_map(|r| r.character).collect();
        MemoryStats {
            total_records: state.records.len(),
            chapters: chapters.len(),
            characters: characters.len(),
        }
    }

    /// Records of one chapter in insertion order.
    pub fn chapter_context(&self, chapter: &str) -> Vec<TranslationRecord> {
        self.state
            .read()
            .map(|s| {
                s.records
                    .iter()
                    .filter(|r| r.chapter == chapter)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn records(&self) -> Vec<TranslationRecord> {
        self.state
            .read()
            .map(|s| s.records.clone())
            .unwrap_or_default()
    }

    /// Write all records as a JSON array.
    pub fn export(&self, path: &Path) -> Result<usize, StoreError> {
        let records = self.records();
        storage::write_export(path, &records)?;
        Ok(records.len())
    }

    /// Merge records from an export (or a store file) through upsert.
    pub fn import(&self, path: &Path) -> Result<usize, StoreError> {
        let records = read_records(path)?;
        let n = records.len();
        self.insert_many(records.into_iter().map(|mut r| {
            r.id = record_id(&r.source_text, &r.chapter);
            r
        }))?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, target: &str, chapter: &str) -> TranslationRecord {
        TranslationRecord::new(source, target, chapter)
    }

    #[test]
    fn upsert_is_idempotent_and_last_write_wins() {
        let mem = TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap);
        let a = mem.insert(record("Hello", "Привет", "ch1")).expect("insert");
        let b = mem.insert(record("Hello", "Здравствуй", "ch1")).expect("insert");
        assert_eq!(a, b);
        assert_eq!(mem.len(), 1);
        assert_eq!(
            mem.find_exact("Hello", Some("ch1")).expect("lookup").as_deref(),
            Some("Здравствуй")
        );
    }

    #[test]
    fn exact_lookup_prefers_chapter() {
        let mem = TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap);
        mem.insert(record("Ding!", "Дзынь!", "ch1")).expect("insert");
        mem.insert(record("Ding!", "Динь!", "ch2")).expect("insert");
        assert_eq!(mem.find_exact("Ding!", Some("ch2")).expect("ok").as_deref(), Some("Динь!"));
        assert_eq!(mem.find_exact("Ding!", Some("ch9")).expect("ok").as_deref(), Some("Дзынь!"));
        assert_eq!(mem.find_exact("Ding!", None).expect("ok").as_deref(), Some("Дзынь!"));
        assert_eq!(mem.find_exact("Dong", None).expect("ok"), None);
    }

    #[test]
    fn identical_text_is_found_at_full_threshold() {
        for backend in [SimilarityBackendKind::TokenOverlap, SimilarityBackendKind::Embedding] {
            let mem = TranslationMemory::in_memory(backend);
            mem.insert(record("The sun rose slowly.", "Солнце медленно встало.", "ch1"))
                .expect("insert");
            mem.insert(record("A cat sat.", "Кот сидел.", "ch1")).expect("insert");
            let hits = mem
                .find_similar("The sun rose slowly.", 1.0, 5)
                .expect("similar");
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].similarity, 1.0);
            assert_eq!(hits[0].record.target_text, "Солнце медленно встало.");
        }
    }

    #[test]
    fn similar_results_are_ranked_with_stable_ties() {
        let mem = TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap);
        mem.insert(record("a b c d", "1", "ch1")).expect("insert");
        mem.insert(record("a b x y", "2", "ch1")).expect("insert");
        mem.insert(record("a b c e", "3", "ch1")).expect("insert");
        mem.insert(record("a b y x", "4", "ch1")).expect("insert");
        let hits = mem.find_similar("a b c", 0.3, 10).expect("similar");
        let targets: Vec<&str> = hits.iter().map(|h| h.record.target_text.as_str()).collect();
        assert_eq!(targets, vec!["1", "3", "2", "4"]);
        let top = mem.find_similar("a b c", 0.3, 1).expect("similar");
        assert_eq!(top.len(), 1);
        assert!(mem.find_similar("zzz", 0.1, 5).expect("similar").is_empty());
    }

    #[test]
    fn failing_index_falls_back_to_token_overlap() {
        let mem = TranslationMemory::in_memory(SimilarityBackendKind::Embedding);
        mem.insert(record("   ", "пусто", "ch1")).expect("insert");
        mem.insert(record("the cat sat", "кот сидел", "ch1")).expect("insert");
        let hits = mem.find_similar("the cat sat down", 0.5, 5).expect("similar");
        assert_eq!(hits.len(), 1);
        assert!((hits[0].similarity - 0.75).abs() < 1e-6);
    }

    #[test]
    fn stats_and_chapter_context() {
        let mem = TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap);
        mem.insert(record("a", "а", "ch1").with_character(Some(CharacterKind::JiangChen)))
            .expect("insert");
        mem.insert(record("b", "б", "ch1").with_character(Some(CharacterKind::JiangChen)))
            .expect("insert");
        mem.insert(record("c", "в", "ch2").with_character(Some(CharacterKind::Elder)))
            .expect("insert");
        assert_eq!(
            mem.stats(),
            MemoryStats {
                total_records: 3,
                chapters: 2,
                characters: 2
            }
        );
        let ctx = mem.chapter_context("ch1");
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[0].source_text, "a");
    }

    #[test]
    fn json_store_persists_and_reloads() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("tm").join("memory.json");
        {
            let mem = TranslationMemory::open(&path, SimilarityBackendKind::TokenOverlap)
                .expect("open");
            mem.insert(record("Hello", "Привет", "ch1").with_quality(92.0))
                .expect("insert");
        }
        let mem = TranslationMemory::open(&path, SimilarityBackendKind::TokenOverlap).expect("reopen");
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.records()[0].quality_score, 92.0);

        let export = dir.path().join("export.json");
        assert_eq!(mem.export(&export).expect("export"), 1);
        let other = TranslationMemory::in_memory(SimilarityBackendKind::TokenOverlap);
        assert_eq!(other.import(&export).expect("import"), 1);
        assert_eq!(other.import(&export).expect("import again"), 1);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn failed_save_switches_to_no_memory() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("memory.json");
        let mem = TranslationMemory::open(&path, SimilarityBackendKind::TokenOverlap).expect("open");
        // a directory where the temp file goes makes the atomic write fail
        std::fs::create_dir(dir.path().join("memory.json.tmp")).expect("block tmp");

        assert!(matches!(
            mem.insert(record("Hello", "Привет", "ch1")),
            Err(StoreError::Io { .. })
        ));
        assert!(!mem.is_enabled());
        assert!(!path.exists());
        assert_eq!(mem.find_exact("Hello", Some("ch1")).expect("lookup"), None);
        assert!(mem.find_similar("Hello", 0.1, 5).expect("similar").is_empty());
        assert!(mem.is_empty());

        // later inserts are dropped without touching storage
        mem.insert(record("Bye", "Пока", "ch1")).expect("dropped insert");
        assert!(mem.is_empty());
    }

    #[test]
    fn corrupt_store_degrades_to_no_memory() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "{ broken").expect("write");
        assert!(matches!(
            TranslationMemory::open(&path, SimilarityBackendKind::TokenOverlap),
            Err(StoreError::Corrupt { .. })
        ));
        let mem = TranslationMemory::open_or_degrade(&path, SimilarityBackendKind::TokenOverlap);
        assert!(!mem.is_enabled());
        mem.insert(record("Hello", "Привет", "ch1")).expect("dropped insert");
        assert_eq!(mem.find_exact("Hello", None).expect("lookup"), None);
        assert!(mem.is_empty());
    }
}
