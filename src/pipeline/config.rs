use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::{locate_config, load_config, resolve_relative, AppConfig, CONFIG_FILENAME};
use crate::memory::{SimilarityBackendKind, TranslationMemory};
use crate::pipeline::resolver::{ResolveContext, ResolverSettings};
use crate::reference::{ReferenceData, BUILTIN_REFERENCE_JSON};
use crate::segmenter::SegmentMode;
use crate::translate::{CachedTranslator, DeepLTranslator, DryRunTranslator, ResponseCache, Translator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslatorBackend {
    DeepL,
    DryRun,
}

impl TranslatorBackend {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("deepl").trim().to_ascii_lowercase().as_str() {
            "dry_run" | "dry-run" | "none" | "echo" => Self::DryRun,
            _ => Self::DeepL,
        }
    }
}

/// Command-line values that win over the config file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub chapter: Option<String>,
    pub scene: Option<String>,
    pub tone: Option<String>,
    pub style: Option<String>,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub max_concurrent: Option<usize>,
    pub dry_run: bool,
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub workdir: PathBuf,
    pub config_path: PathBuf,

    pub chapter: String,
    pub scene: Option<String>,
    pub tone: Option<String>,
    pub style: String,
    pub source_lang: String,
    pub target_lang: String,

    pub segment_mode: SegmentMode,
    pub batch_chars: usize,
    pub max_concurrent: usize,
    pub similarity_threshold: f32,

    pub reference_path: PathBuf,
    pub trace_dir: PathBuf,
    pub trace: bool,
    pub normalize_blank_lines: bool,

    pub memory_path: PathBuf,
    pub memory_backend: SimilarityBackendKind,
    pub memory_disabled: bool,

    pub translator: TranslatorBackend,
    pub api_key_env: String,
    pub api_url: Option<String>,
    pub formality: Option<String>,
    pub timeout: Duration,
    pub cache_path: PathBuf,
    pub cache_max_age_hours: u64,
}

impl RunConfig {
    pub fn from_paths_and_args(
        input: &Path,
        config_path: Option<PathBuf>,
        overrides: CliOverrides,
    ) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = locate_config(config_path, &workdir);
        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| workdir.join(CONFIG_FILENAME));
        let base = cfg_path
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| workdir.clone());

        let chapter = overrides
            .chapter
            .filter(|c| !c.trim().is_empty())
            .or_else(|| input.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .unwrap_or_else(|| "chapter".to_string());

        let p = &file_cfg.pipeline;
        let m = &file_cfg.memory;
        let t = &file_cfg.translator;

        let trace_dir = p.trace_dir.clone().unwrap_or_else(|| "_trace".to_string());
        let translator = if overrides.dry_run {
            TranslatorBackend::DryRun
        } else {
            TranslatorBackend::parse(t.backend.as_deref())
        };

        Ok(Self {
            workdir: workdir.clone(),
            chapter,
            scene: overrides.scene,
            tone: overrides.tone,
            style: overrides
                .style
                .or_else(|| p.style.clone())
                .unwrap_or_else(|| "modern_web_novel".to_string()),
            source_lang: overrides
                .source_lang
                .or_else(|| p.source_lang.clone())
                .unwrap_or_else(|| "EN".to_string())
                .to_ascii_uppercase(),
            target_lang: overrides
                .target_lang
                .or_else(|| p.target_lang.clone())
                .unwrap_or_else(|| "RU".to_string())
                .to_ascii_uppercase(),
            segment_mode: SegmentMode::parse(p.segment_mode.as_deref()),
            batch_chars: p.batch_chars.unwrap_or(1000).max(1),
            max_concurrent: overrides
                .max_concurrent
                .or(p.max_concurrent)
                .unwrap_or(10)
                .max(1),
            similarity_threshold: p.similarity_threshold.unwrap_or(0.85).clamp(0.0, 1.0),
            reference_path: resolve_relative(
                &base,
                p.reference.as_deref().unwrap_or("reference.json"),
            ),
            trace_dir: resolve_relative(&workdir, &trace_dir),
            trace: p.trace.unwrap_or(false),
            normalize_blank_lines: p.normalize_blank_lines.unwrap_or(false),
            memory_path: resolve_relative(
                &base,
                m.path.as_deref().unwrap_or("translation_memory/memory.json"),
            ),
            memory_backend: SimilarityBackendKind::parse(m.backend.as_deref()),
            memory_disabled: m.disabled.unwrap_or(false),
            translator,
            api_key_env: t
                .api_key_env
                .clone()
                .unwrap_or_else(|| "DEEPL_API_KEY".to_string()),
            api_url: t.api_url.clone(),
            formality: Some(t.formality.clone().unwrap_or_else(|| "less".to_string())),
            timeout: Duration::from_secs(t.timeout_secs.unwrap_or(30).max(1)),
            cache_path: resolve_relative(
                &base,
                t.cache_path
                    .as_deref()
                    .unwrap_or("deepl_cache/translations.json"),
            ),
            cache_max_age_hours: t.cache_max_age_hours.unwrap_or(24),
            config_path: cfg_path,
        })
    }

    /// Configured file if present, else the built-in data. A broken file
    /// degrades to the empty reference set.
    pub fn load_reference(&self) -> Arc<ReferenceData> {
        if self.reference_path.exists() {
            return Arc::new(ReferenceData::load_or_default(&self.reference_path));
        }
        tracing::info!(path = %self.reference_path.display(), "reference file not found; using built-in reference data");
        match ReferenceData::builtin() {
            Ok(r) => Arc::new(r),
            Err(e) => {
                tracing::warn!(error = %e, "built-in reference data unusable; using empty reference set");
                Arc::new(ReferenceData::empty())
            }
        }
    }

    pub fn open_memory(&self) -> Arc<TranslationMemory> {
        if self.memory_disabled {
            return Arc::new(TranslationMemory::disabled());
        }
        Arc::new(TranslationMemory::open_or_degrade(
            &self.memory_path,
            self.memory_backend,
        ))
    }

    pub fn build_translator(&self) -> anyhow::Result<Arc<dyn Translator>> {
        match self.translator {
            TranslatorBackend::DryRun => Ok(Arc::new(DryRunTranslator)),
            TranslatorBackend::DeepL => {
                let deepl = DeepLTranslator::from_env(
                    &self.api_key_env,
                    self.api_url.clone(),
                    self.formality.clone(),
                    self.timeout,
                )
                .context("set up DeepL translator (use --dry-run to run offline)")?;
                let cache = ResponseCache::open(&self.cache_path, self.cache_max_age_hours);
                Ok(Arc::new(CachedTranslator::new(Arc::new(deepl), cache)))
            }
        }
    }

    pub fn resolve_context(&self) -> ResolveContext {
        ResolveContext::new(self.chapter.clone(), self.style.clone())
            .with_scene(self.scene.clone())
            .with_tone(self.tone.clone())
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            similarity_threshold: self.similarity_threshold,
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
            batch_chars: self.batch_chars,
            max_concurrent: self.max_concurrent,
        }
    }
}

/// `<stem>-<target>.txt` next to the input.
pub fn default_output_for(input: &Path, target_lang: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    input.with_file_name(format!("{stem}-{}.txt", target_lang.to_ascii_lowercase()))
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);

    let reference_path = dir.join("reference.json");
    if !reference_path.exists() || force {
        std::fs::write(&reference_path, BUILTIN_REFERENCE_JSON)
            .with_context(|| format!("write reference data: {}", reference_path.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[pipeline]
source_lang = "EN"
target_lang = "RU"
style = "modern_web_novel"

# "lines" keeps one segment per source line (exact structure);
# "paragraphs" groups non-blank lines and drops blank separators.
segment_mode = "lines"
batch_chars = 1000
max_concurrent = 10
similarity_threshold = 0.85

reference = "reference.json"
trace_dir = "_trace"
trace = false
normalize_blank_lines = false

[memory]
path = "translation_memory/memory.json"
# "token_overlap" or "embedding"
backend = "token_overlap"

[translator]
# "deepl" or "dry_run"
backend = "deepl"
api_key_env = "DEEPL_API_KEY"
# api_url = "https://api-free.deepl.com/v2/translate"
formality = "less"
timeout_secs = 30
cache_path = "deepl_cache/translations.json"
cache_max_age_hours = 24
"#;
