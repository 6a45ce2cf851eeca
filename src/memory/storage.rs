use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::memory::TranslationRecord;

pub const MEMORY_SCHEMA: &str = "chapter_translator.memory.v1";

#[derive(Debug, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    schema: String,
    #[serde(default)]
    records: Vec<TranslationRecord>,
}

/// Where translation-memory records live between runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryStorage {
    /// Whole store rewritten atomically on every change.
    JsonFile(PathBuf),
    InMemory,
    /// No-memory mode: nothing is kept, every lookup misses.
    Disabled,
}

impl MemoryStorage {
    pub fn load(&self) -> Result<Vec<TranslationRecord>, StoreError> {
        match self {
            Self::JsonFile(path) => read_records(path),
            Self::InMemory | Self::Disabled => Ok(Vec::new()),
        }
    }

    pub fn save(&self, records: &[TranslationRecord]) -> Result<(), StoreError> {
        match self {
            Self::JsonFile(path) => write_records(path, records),
            Self::InMemory | Self::Disabled => Ok(()),
        }
    }
}

/// Missing file reads as an empty store. Accepts both the wrapped layout and
/// a bare array of records (the export format).
pub fn read_records(path: &Path) -> Result<Vec<TranslationRecord>, StoreError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let text = text.trim_start_matches('\u{FEFF}');
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let corrupt = |source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    };
    if text.trim_start().starts_with('[') {
        serde_json::from_str(text).map_err(corrupt)
    } else {
        serde_json::from_str::<MemoryFile>(text)
            .map(|f| f.records)
            .map_err(corrupt)
    }
}

pub fn write_records(path: &Path, records: &[TranslationRecord]) -> Result<(), StoreError> {
    let file = MemoryFile {
        schema: MEMORY_SCHEMA.to_string(),
        records: records.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    write_atomic(path, json.as_bytes())
}

pub fn write_export(path: &Path, records: &[TranslationRecord]) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(records)?;
    write_atomic(path, json.as_bytes())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}
