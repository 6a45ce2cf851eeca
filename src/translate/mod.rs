//! The external Translate capability and the plumbing around it.

mod cache;
mod deepl;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::TranslateError;
use crate::progress::RunProgress;

pub use cache::{cache_key, CacheStats, CachedTranslator, ResponseCache};
pub use deepl::{endpoint_for_key, DeepLTranslator};

/// Per-text result of a translate call, positionally matching the input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranslationOutcome {
    pub text: String,
    #[serde(default)]
    pub detected_source_lang: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TranslationOutcome {
    pub fn ok(text: impl Into<String>, detected_source_lang: Option<String>) -> Self {
        Self {
            text: text.into(),
            detected_source_lang,
            success: true,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            detected_source_lang: None,
            success: false,
            error_message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &str;

    /// Translate `texts` in order. Implementations return exactly one outcome
    /// per input text.
    async fn translate(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslationOutcome>, TranslateError>;
}

/// Returns every text unchanged. Lets the pipeline run offline.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunTranslator;

#[async_trait]
impl Translator for DryRunTranslator {
    fn name(&self) -> &str {
        "dry_run"
    }

    async fn translate(
        &self,
        texts: &[String],
        _source_lang: &str,
        _target_lang: &str,
    ) -> Result<Vec<TranslationOutcome>, TranslateError> {
        Ok(texts
            .iter()
            .map(|t| TranslationOutcome::ok(t.clone(), None))
            .collect())
    }
}

/// One call with empty texts skipped and positions restored. Never fails:
/// call errors and short responses become failed outcomes.
pub async fn translate_positional(
    translator: &dyn Translator,
    texts: &[String],
    source_lang: &str,
    target_lang: &str,
) -> Vec<TranslationOutcome> {
    let positions: Vec<usize> = texts
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.trim().is_empty())
        .map(|(i, _)| i)
        .collect();
    let mut out: Vec<TranslationOutcome> = texts
        .iter()
        .map(|t| TranslationOutcome::ok(t.clone(), None))
        .collect();
    if positions.is_empty() {
        return out;
    }
    let payload: Vec<String> = positions.iter().map(|&i| texts[i].clone()).collect();
    let results = match translator.translate(&payload, source_lang, target_lang).await {
        Ok(r) if r.len() == payload.len() => r,
        Ok(r) => {
            let e = TranslateError::Malformed(format!(
                "{} results for {} texts",
                r.len(),
                payload.len()
            ));
            vec![TranslationOutcome::failed(e.to_string()); payload.len()]
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                backend = translator.name(),
                texts = payload.len(),
                "translate call failed"
            );
            vec![TranslationOutcome::failed(e.to_string()); payload.len()]
        }
    };
    for (pos, result) in positions.into_iter().zip(results) {
        out[pos] = result;
    }
    out
}

/// Runs translate batches concurrently under a permit cap.
pub struct BatchRunner {
    translator: Arc<dyn Translator>,
    limiter: Semaphore,
    source_lang: String,
    target_lang: String,
    progress: Option<Arc<RunProgress>>,
}

impl BatchRunner {
    pub fn new(
        translator: Arc<dyn Translator>,
        max_concurrent: usize,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        Self {
            translator,
            limiter: Semaphore::new(max_concurrent.max(1)),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<RunProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn translator_name(&self) -> &str {
        self.translator.name()
    }

    /// Outcomes per batch, in batch order. Batches still waiting or in flight
    /// when `cancel` fires resolve to `cancelled` failures.
    pub async fn run(
        &self,
        batches: &[Vec<String>],
        cancel: &CancellationToken,
    ) -> Vec<Vec<TranslationOutcome>> {
        let done = AtomicUsize::new(0);
        let total = batches.len();
        join_all(batches.iter().map(|batch| async {
            let out = self.run_one(batch, cancel).await;
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(p) = self.progress.as_deref() {
                p.progress("batch", n, total);
            }
            out
        }))
        .await
    }

    async fn run_one(&self, texts: &[String], cancel: &CancellationToken) -> Vec<TranslationOutcome> {
        let cancelled =
            || vec![TranslationOutcome::failed(TranslateError::Cancelled.to_string()); texts.len()];
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(),
            p = self.limiter.acquire() => p,
        };
        let Ok(_permit) = permit else {
            return vec![TranslationOutcome::failed("translate limiter closed"); texts.len()];
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => cancelled(),
            out = translate_positional(
                self.translator.as_ref(),
                texts,
                &self.source_lang,
                &self.target_lang,
            ) => out,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Scripted translator: known texts map to fixed outputs, anything else
    /// is echoed with a marker. Counts calls and texts.
    #[derive(Default)]
    pub struct MockTranslator {
        pub script: HashMap<String, String>,
        pub fail_on: Option<String>,
        pub delay: Option<Duration>,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<String>>,
    }

    impl MockTranslator {
        pub fn with(pairs: &[(&str, &str)]) -> Self {
            Self {
                script: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Translator for MockTranslator {
        fn name(&self) -> &str {
            "mock"
        }

        async fn translate(
            &self,
            texts: &[String],
            _source_lang: &str,
            _target_lang: &str,
        ) -> Result<Vec<TranslationOutcome>, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(texts.iter().cloned());
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if let Some(bad) = self.fail_on.as_deref() {
                if texts.iter().any(|t| t == bad) {
                    return Err(TranslateError::Unavailable("scripted failure".into()));
                }
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let out = self
                        .script
                        .get(t)
                        .cloned()
                        .unwrap_or_else(|| format!("[ru] {t}"));
                    TranslationOutcome::ok(out, Some("EN".into()))
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::MockTranslator;
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_texts_keep_their_positions() {
        let mock = MockTranslator::with(&[("Hello", "Привет")]);
        let out = translate_positional(&mock, &strings(&["", "Hello", "  "]), "EN", "RU").await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].text, "");
        assert_eq!(out[1].text, "Привет");
        assert_eq!(out[2].text, "  ");
        assert_eq!(mock.seen.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn call_failure_marks_every_text() {
        let mock = MockTranslator {
            fail_on: Some("bad".into()),
            ..MockTranslator::default()
        };
        let out = translate_positional(&mock, &strings(&["ok", "bad"]), "EN", "RU").await;
        assert!(out.iter().all(|o| !o.success && o.error_message.is_some()));
    }

    #[tokio::test]
    async fn runner_keeps_batch_order() {
        let mock = Arc::new(MockTranslator::with(&[("a", "а"), ("b", "б"), ("c", "в")]));
        let runner = BatchRunner::new(mock.clone(), 2, "EN", "RU");
        let batches = vec![strings(&["a"]), strings(&["b", "c"]), strings(&["d"])];
        let out = runner.run(&batches, &CancellationToken::new()).await;
        let texts: Vec<Vec<&str>> = out
            .iter()
            .map(|b| b.iter().map(|o| o.text.as_str()).collect())
            .collect();
        assert_eq!(texts, vec![vec!["а"], vec!["б", "в"], vec!["[ru] d"]]);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn cancelled_runs_do_not_block() {
        let mock = Arc::new(MockTranslator {
            delay: Some(Duration::from_secs(30)),
            ..MockTranslator::default()
        });
        let runner = BatchRunner::new(mock, 1, "EN", "RU");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let out = tokio::time::timeout(
            Duration::from_secs(5),
            runner.run(&[strings(&["a"]), strings(&["b"])], &cancel),
        )
        .await
        .expect("cancellation returns promptly");
        assert!(out
            .iter()
            .flatten()
            .all(|o| o.error_message.as_deref() == Some("cancelled")));
    }
}
