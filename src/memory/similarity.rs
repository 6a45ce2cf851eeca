//! Pluggable similarity for fuzzy translation-memory lookup.

use std::collections::HashSet;

use crate::error::StoreError;
use crate::textutil::word_set;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SimilarityBackendKind {
    #[default]
    TokenOverlap,
    Embedding,
}

impl SimilarityBackendKind {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("token_overlap").trim().to_ascii_lowercase().as_str() {
            "embedding" | "ngram" | "vector" => Self::Embedding,
            _ => Self::TokenOverlap,
        }
    }

    pub fn build(self) -> Box<dyn SimilarityIndex> {
        match self {
            Self::TokenOverlap => Box::new(TokenOverlap),
            Self::Embedding => Box::new(NgramEmbeddingIndex::new(EMBEDDING_DIMS)),
        }
    }
}

/// Scores a query against every stored source text, slot by slot.
pub trait SimilarityIndex: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called whenever `slot` gets (new) source text.
    fn insert(&mut self, slot: usize, source: &str) -> Result<(), StoreError>;

    /// One score in `0.0..=1.0` per entry of `sources` (indexed by slot).
    fn scores(&self, query: &str, sources: &[&str]) -> Result<Vec<f32>, StoreError>;
}

/// Jaccard similarity of lowercased whitespace-separated word sets.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenOverlap;

impl TokenOverlap {
    pub fn similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let inter = a.intersection(b).count();
        let union = a.union(b).count();
        inter as f32 / union as f32
    }
}

impl SimilarityIndex for TokenOverlap {
    fn name(&self) -> &'static str {
        "token_overlap"
    }

    fn insert(&mut self, _slot: usize, _source: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn scores(&self, query: &str, sources: &[&str]) -> Result<Vec<f32>, StoreError> {
        let q = word_set(query);
        Ok(sources
            .iter()
            .map(|s| Self::similarity(&q, &word_set(s)))
            .collect())
    }
}

pub const EMBEDDING_DIMS: usize = 256;

/// Hashed character-trigram vectors compared by cosine similarity.
///
/// Vectors are computed on insert; a slot without a vector makes the whole
/// query fail so the store can fall back to token overlap.
#[derive(Clone, Debug)]
pub struct NgramEmbeddingIndex {
    dims: usize,
    vectors: Vec<Option<Vec<f32>>>,
}

impl NgramEmbeddingIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            vectors: Vec::new(),
        }
    }

    pub fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let norm: String = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if norm.is_empty() {
            return None;
        }
        let chars: Vec<char> = std::iter::once(' ')
            .chain(norm.chars())
            .chain(std::iter::once(' '))
            .collect();
        let mut v = vec![0f32; self.dims];
        for w in chars.windows(3) {
            let h = fnv1a(w);
            v[(h % self.dims as u64) as usize] += 1.0;
        }
        let len = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if len == 0.0 {
            return None;
        }
        v.iter_mut().for_each(|x| *x /= len);
        Some(v)
    }
}

impl SimilarityIndex for NgramEmbeddingIndex {
    fn name(&self) -> &'static str {
        "ngram_embedding"
    }

    fn insert(&mut self, slot: usize, source: &str) -> Result<(), StoreError> {
        if self.vectors.len() <= slot {
            self.vectors.resize(slot + 1, None);
        }
        let vector = self.embed(source);
        let ok = vector.is_some();
        self.vectors[slot] = vector;
        if ok {
            Ok(())
        } else {
            Err(StoreError::Index(format!("no features for slot {slot}")))
        }
    }

    fn scores(&self, query: &str, sources: &[&str]) -> Result<Vec<f32>, StoreError> {
        if self.vectors.len() != sources.len() {
            return Err(StoreError::Index(format!(
                "index holds {} vectors for {} records",
                self.vectors.len(),
                sources.len()
            )));
        }
        let Some(q) = self.embed(query) else {
            return Ok(vec![0.0; sources.len()]);
        };
        self.vectors
            .iter()
            .enumerate()
            .map(|(slot, v)| {
                let v = v
                    .as_ref()
                    .ok_or_else(|| StoreError::Index(format!("slot {slot} has no vector")))?;
                let dot: f32 = q.iter().zip(v).map(|(a, b)| a * b).sum();
                Ok(dot.clamp(0.0, 1.0))
            })
            .collect()
    }
}

fn fnv1a(chars: &[char]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for c in chars {
        let mut buf = [0u8; 4];
        for b in c.encode_utf8(&mut buf).bytes() {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
    }
    h
}
