//! Persistent response cache in front of a [`Translator`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{TranslationOutcome, Translator};
use crate::error::TranslateError;

const FLUSH_EVERY: usize = 10;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CacheEntry {
    translation: String,
    #[serde(default)]
    detected_source_lang: Option<String>,
    created: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    unsaved: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub fn cache_key(text: &str, source_lang: &str, target_lang: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{text}|{source_lang}|{target_lang}").as_bytes());
    hex::encode(hasher.finalize())
}

pub struct ResponseCache {
    path: Option<PathBuf>,
    max_age: Duration,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    pub fn in_memory(max_age_hours: u64) -> Self {
        Self {
            path: None,
            max_age: hours(max_age_hours),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Loads `path` if present. An unreadable cache file starts empty.
    pub fn open(path: &Path, max_age_hours: u64) -> Self {
        let mut cache = Self::in_memory(max_age_hours);
        cache.path = Some(path.to_path_buf());
        match load_entries(path) {
            Ok(entries) => {
                let now = Utc::now();
                let max_age = cache.max_age;
                let state = cache.state.get_mut().unwrap_or_else(|e| e.into_inner());
                state.entries = entries
                    .into_iter()
                    .filter(|(_, e)| now - e.created <= max_age)
                    .collect();
                tracing::debug!(entries = state.entries.len(), path = %path.display(), "response cache loaded");
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "response cache unreadable; starting empty");
            }
        }
        cache
    }

    pub fn get(&self, text: &str, source_lang: &str, target_lang: &str) -> Option<TranslationOutcome> {
        let key = cache_key(text, source_lang, target_lang);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = state
            .entries
            .get(&key)
            .map(|e| Utc::now() - e.created <= self.max_age);
        match fresh {
            Some(true) => {
                state.hits += 1;
                state
                    .entries
                    .get(&key)
                    .map(|e| TranslationOutcome::ok(e.translation.clone(), e.detected_source_lang.clone()))
            }
            Some(false) => {
                state.entries.remove(&key);
                state.misses += 1;
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Failed outcomes are not cached.
    pub fn put(&self, text: &str, source_lang: &str, target_lang: &str, outcome: &TranslationOutcome) {
        if !outcome.success {
            return;
        }
        let due = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.entries.insert(
                cache_key(text, source_lang, target_lang),
                CacheEntry {
                    translation: outcome.text.clone(),
                    detected_source_lang: outcome.detected_source_lang.clone(),
                    created: Utc::now(),
                },
            );
            state.unsaved += 1;
            state.unsaved >= FLUSH_EVERY
        };
        if due {
            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "response cache flush failed");
            }
        }
    }

    pub fn flush(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let json = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.unsaved == 0 {
                return Ok(());
            }
            state.unsaved = 0;
            serde_json::to_string_pretty(&state.entries).context("serialize response cache")?
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;
        }
        std::fs::write(path, json).with_context(|| format!("write response cache: {}", path.display()))
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let lookups = state.hits + state.misses;
        CacheStats {
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }
}

impl Drop for ResponseCache {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "response cache flush on drop failed");
        }
    }
}

// capped at a century
fn hours(h: u64) -> Duration {
    Duration::hours(h.min(876_000) as i64)
}

fn load_entries(path: &Path) -> Result<HashMap<String, CacheEntry>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e).with_context(|| format!("read response cache: {}", path.display())),
    };
    if text.trim().is_empty() {
        return Ok(HashMap::new());
    }
    serde_json::from_str(&text).with_context(|| format!("parse response cache: {}", path.display()))
}

/// Serves repeated texts from a [`ResponseCache`] and forwards the rest.
pub struct CachedTranslator {
    inner: Arc<dyn Translator>,
    cache: ResponseCache,
}

impl CachedTranslator {
    pub fn new(inner: Arc<dyn Translator>, cache: ResponseCache) -> Self {
        Self { inner, cache }
    }

    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

#[async_trait]
impl Translator for CachedTranslator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn translate(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslationOutcome>, TranslateError> {
        let mut out: Vec<Option<TranslationOutcome>> = texts
            .iter()
            .map(|t| self.cache.get(t, source_lang, target_lang))
            .collect();
        let missing: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            let payload: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fetched = self.inner.translate(&payload, source_lang, target_lang).await?;
            if fetched.len() != payload.len() {
                return Err(TranslateError::Malformed(format!(
                    "{} results for {} texts",
                    fetched.len(),
                    payload.len()
                )));
            }
            for (i, outcome) in missing.into_iter().zip(fetched) {
                self.cache.put(&texts[i], source_lang, target_lang, &outcome);
                out[i] = Some(outcome);
            }
        }
        Ok(out
            .into_iter()
            .map(|o| o.unwrap_or_else(|| TranslationOutcome::failed("missing result")))
            .collect())
    }
}
