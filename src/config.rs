use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_FILENAME: &str = "chapter-translator.toml";
pub const CONFIG_ENV: &str = "CHAPTER_TRANSLATOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub translator: TranslatorSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    /// Style label; part of the resolver's process-cache key.
    #[serde(default)]
    pub style: Option<String>,

    /// "lines" (default) or "paragraphs".
    #[serde(default)]
    pub segment_mode: Option<String>,
    /// Character budget of one translate batch.
    #[serde(default)]
    pub batch_chars: Option<usize>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub similarity_threshold: Option<f32>,

    /// Reference data JSON. Relative to the config file.
    #[serde(default)]
    pub reference: Option<String>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace: Option<bool>,
    /// Collapse runs of blank lines in the written output.
    #[serde(default)]
    pub normalize_blank_lines: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct MemorySection {
    #[serde(default)]
    pub path: Option<String>,
    /// "token_overlap" (default) or "embedding".
    #[serde(default)]
    pub backend: Option<String>,
    /// Run without a translation memory.
    #[serde(default)]
    pub disabled: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TranslatorSection {
    /// "deepl" (default) or "dry_run".
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Overrides the endpoint picked from the key suffix.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub formality: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cache_path: Option<String>,
    #[serde(default)]
    pub cache_max_age_hours: Option<u64>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

/// `--config`, then the env override, then the upward search.
pub fn locate_config(explicit: Option<PathBuf>, workdir: &Path) -> Option<PathBuf> {
    explicit
        .or_else(|| std::env::var(CONFIG_ENV).ok().filter(|s| !s.trim().is_empty()).map(PathBuf::from))
        .or_else(|| find_default_config(workdir, CONFIG_FILENAME))
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// Absolute paths pass through; relative ones are taken from `base`.
pub fn resolve_relative(base: &Path, value: &str) -> PathBuf {
    let p = PathBuf::from(value.trim());
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_optional() {
        let cfg: AppConfig = toml::from_str("").expect("empty config");
        assert!(cfg.pipeline.batch_chars.is_none());
        assert!(cfg.translator.backend.is_none());
    }

    #[test]
    fn parses_all_sections() {
        let cfg: AppConfig = toml::from_str(
            r#"
[pipeline]
segment_mode = "paragraphs"
batch_chars = 500
similarity_threshold = 0.9

[memory]
backend = "embedding"

[translator]
backend = "dry_run"
timeout_secs = 5
"#,
        )
        .expect("config");
        assert_eq!(cfg.pipeline.segment_mode.as_deref(), Some("paragraphs"));
        assert_eq!(cfg.pipeline.batch_chars, Some(500));
        assert_eq!(cfg.memory.backend.as_deref(), Some("embedding"));
        assert_eq!(cfg.translator.timeout_secs, Some(5));
    }

    #[test]
    fn upward_search_finds_parent_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILENAME), "").expect("write");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        let found = find_file_upwards(&nested, CONFIG_FILENAME, 8).expect("found");
        assert_eq!(found, dir.path().join(CONFIG_FILENAME));
        assert!(find_file_upwards(&nested, "missing.toml", 1).is_none());
    }

    #[test]
    fn relative_paths_join_the_base() {
        let base = Path::new("/cfg");
        assert_eq!(resolve_relative(base, "tm/memory.json"), PathBuf::from("/cfg/tm/memory.json"));
        assert_eq!(resolve_relative(base, "/abs.json"), PathBuf::from("/abs.json"));
    }
}
