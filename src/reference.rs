//! Static reference data: glossary, forbidden words, character roster,
//! phrase base, contextual substitution tables, detection rule tables and
//! quality weights. Loaded once from one JSON document and read-only after.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::character::{
    CharacterClassifier, CharacterKind, CharacterProfile, CharacterRoster, StyleProfile,
};
use crate::error::ReferenceError;
use crate::quality::QualityConfig;
use crate::segmenter::Segmenter;
use crate::terminology::{Glossary, TermConflict};

pub const BUILTIN_REFERENCE_JSON: &str = include_str!("../assets/reference.json");

/// Section used for phrases that apply to every chapter.
pub const GLOBAL_PHRASES: &str = "*";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationErrors {
    pub forbidden_words: Vec<String>,
    /// Word to a comma-separated list of alternatives; the first one is used.
    pub preferred_alternatives: BTreeMap<String, String>,
}

/// Named, swappable detection tables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTables {
    pub dialogue_patterns: Vec<String>,
    pub system_markers: Vec<String>,
    pub archaisms: Vec<String>,
    /// Calque to suggested rewrite (empty when there is none).
    pub calques: BTreeMap<String, String>,
    pub formal_dialogue: BTreeMap<String, String>,
    pub natural_markers: Vec<String>,
    pub max_sentence_words: usize,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn pairs(items: &[(&str, &str)]) -> BTreeMap<String, String> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Default for RuleTables {
    fn default() -> Self {
        Self {
            dialogue_patterns: strings(&[r#""[^"]*""#, r"«[^»]*»", r"“[^”]*”", r"—[^—]*—"]),
            system_markers: strings(&[
                "Динь!",
                "Система",
                "Оповещение",
                "Получено",
                "Награда",
                "Ding!",
                "System",
                "Notification",
                "Obtained",
                "Reward",
            ]),
            archaisms: strings(&[
                "сей",
                "сия",
                "оный",
                "дабы",
                "ибо",
                "воистину",
                "весьма",
                "отнюдь",
                "непременно",
                "молвить",
                "воззреть",
                "вопрошать",
                "ныне",
                "осуществлять",
                "производить впечатление",
                "испытывать чувство",
            ]),
            calques: pairs(&[
                ("крайне", "очень"),
                ("слева и справа", "по обе стороны"),
                ("совершенна", "идеальна"),
                ("На его взгляд", "Ему казалось"),
                ("резюмировал", "подвёл итог"),
            ]),
            formal_dialogue: pairs(&[
                ("Я собираюсь", "Я буду"),
                ("Позвольте мне", "Дай мне"),
                ("Не могли бы вы", "Можешь"),
                ("Я хотел бы", "Хочу"),
                ("Кажется, что", "Похоже"),
                ("Я боюсь, что", "Боюсь"),
            ]),
            natural_markers: strings(&["Дай мне", "Можешь", "Хочу", "Похоже"]),
            max_sentence_words: 15,
        }
    }
}

/// Rule tables with their regexes compiled.
#[derive(Clone, Debug)]
pub struct CompiledRules {
    pub tables: RuleTables,
    pub dialogue: Vec<Regex>,
    pub system: Option<Regex>,
    /// Case-insensitive, word-bounded matcher per archaism.
    pub archaisms: Vec<(String, Regex)>,
}

static DEFAULT_RULES: Lazy<CompiledRules> = Lazy::new(|| {
    CompiledRules::compile(RuleTables::default()).expect("built-in rule tables compile")
});

impl Default for CompiledRules {
    fn default() -> Self {
        DEFAULT_RULES.clone()
    }
}

impl CompiledRules {
    pub fn compile(tables: RuleTables) -> Result<Self, ReferenceError> {
        let dialogue = tables
            .dialogue_patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        let markers: Vec<String> = tables
            .system_markers
            .iter()
            .filter(|m| !m.trim().is_empty())
            .map(|m| regex::escape(m))
            .collect();
        let system = if markers.is_empty() {
            None
        } else {
            Some(compile(&format!("(?i)(?:{})", markers.join("|")))?)
        };

        let archaisms = tables
            .archaisms
            .iter()
            .filter(|w| !w.trim().is_empty())
            .map(|w| compile(&word_pattern(w, true)).map(|re| (w.clone(), re)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tables,
            dialogue,
            system,
            archaisms,
        })
    }
}

fn compile(pattern: &str) -> Result<Regex, ReferenceError> {
    Regex::new(pattern).map_err(|source| ReferenceError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Whole-word matcher for a literal word or phrase.
pub fn word_pattern(word: &str, case_insensitive: bool) -> String {
    let word = word.trim();
    let flags = if case_insensitive { "(?i)" } else { "" };
    let lead = if word.starts_with(char::is_alphanumeric) { r"\b" } else { "" };
    let tail = if word.ends_with(char::is_alphanumeric) { r"\b" } else { "" };
    format!("{flags}{lead}{}{tail}", regex::escape(word))
}

pub fn word_regex(word: &str, case_insensitive: bool) -> Result<Regex, ReferenceError> {
    compile(&word_pattern(word, case_insensitive))
}

/// On-disk layout; every section is optional.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct ReferenceFile {
    glossary_terms: BTreeMap<String, BTreeMap<String, String>>,
    phrase_translations: BTreeMap<String, BTreeMap<String, String>>,
    translation_errors: TranslationErrors,
    characters: Vec<CharacterProfile>,
    scene_adaptations: BTreeMap<String, BTreeMap<String, String>>,
    tone_adaptations: BTreeMap<String, BTreeMap<String, String>>,
    rules: RuleTables,
    quality: QualityConfig,
}

#[derive(Clone, Debug, Default)]
pub struct ReferenceData {
    glossary: Glossary,
    phrases: BTreeMap<String, BTreeMap<String, String>>,
    errors: TranslationErrors,
    forbidden: Vec<(String, Regex)>,
    roster: CharacterRoster,
    scenes: BTreeMap<String, BTreeMap<String, String>>,
    tones: BTreeMap<String, BTreeMap<String, String>>,
    rules: CompiledRules,
    quality: QualityConfig,
}

impl ReferenceData {
    /// No glossary, phrases, forbidden words or characters; built-in rule
    /// tables and quality weights.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Result<Self, ReferenceError> {
        Self::from_json_str(BUILTIN_REFERENCE_JSON)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ReferenceError> {
        let file: ReferenceFile = serde_json::from_str(json.trim_start_matches('\u{FEFF}'))?;
        Self::from_file(file)
    }

    pub fn load(path: &Path) -> Result<Self, ReferenceError> {
        let text = std::fs::read_to_string(path).map_err(|source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Like [`ReferenceData::load`], but a missing or broken file yields the
    /// empty reference set.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "reference data unavailable; using empty reference set"
                );
                Self::empty()
            }
        }
    }

    fn from_file(file: ReferenceFile) -> Result<Self, ReferenceError> {
        let (glossary, conflicts) = Glossary::from_categories(&file.glossary_terms);
        for TermConflict {
            src,
            existing_tgt,
            proposed_tgt,
        } in conflicts
        {
            tracing::warn!(%src, %existing_tgt, %proposed_tgt, "glossary conflict; keeping first rendering");
        }
        let roster = CharacterRoster::new(file.characters)?;
        let rules = CompiledRules::compile(file.rules)?;
        let forbidden = file
            .translation_errors
            .forbidden_words
            .iter()
            .filter(|w| !w.trim().is_empty())
            .map(|w| word_regex(w, true).map(|re| (w.clone(), re)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            glossary,
            phrases: file.phrase_translations,
            errors: file.translation_errors,
            forbidden,
            roster,
            scenes: file.scene_adaptations,
            tones: file.tone_adaptations,
            rules,
            quality: file.quality,
        })
    }

    #[must_use]
    pub fn glossary(&self) -> &Glossary {
        &self.glossary
    }

    #[must_use]
    pub fn term_for(&self, english: &str) -> Option<&str> {
        self.glossary.term_for(english)
    }

    #[must_use]
    pub fn forbidden_words(&self) -> &[String] {
        &self.errors.forbidden_words
    }

    /// Whole-word, case-insensitive matcher per forbidden word.
    #[must_use]
    pub fn forbidden_matchers(&self) -> &[(String, Regex)] {
        &self.forbidden
    }

    /// First configured alternative, or the word itself.
    #[must_use]
    pub fn preferred_alternative<'a>(&'a self, word: &'a str) -> &'a str {
        self.errors
            .preferred_alternatives
            .get(word)
            .and_then(|alts| alts.split(',').map(str::trim).find(|a| !a.is_empty()))
            .unwrap_or(word)
    }

    #[must_use]
    pub fn roster(&self) -> &CharacterRoster {
        &self.roster
    }

    #[must_use]
    pub fn style_for(&self, kind: CharacterKind) -> Option<StyleProfile<'_>> {
        self.roster.style_for(kind)
    }

    /// Exact phrase from the chapter's table, else from any table.
    #[must_use]
    pub fn phrase_for(&self, text: &str, chapter: Option<&str>) -> Option<&str> {
        let key = text.trim();
        if key.is_empty() {
            return None;
        }
        chapter
            .and_then(|c| self.phrases.get(c))
            .and_then(|table| table.get(key))
            .or_else(|| self.phrases.get(GLOBAL_PHRASES).and_then(|t| t.get(key)))
            .or_else(|| self.phrases.values().find_map(|table| table.get(key)))
            .map(String::as_str)
    }

    #[must_use]
    pub fn scene_table(&self, scene: &str) -> Option<&BTreeMap<String, String>> {
        self.scenes.get(scene)
    }

    #[must_use]
    pub fn tone_table(&self, tone: &str) -> Option<&BTreeMap<String, String>> {
        self.tones.get(tone)
    }

    #[must_use]
    pub fn rules(&self) -> &CompiledRules {
        &self.rules
    }

    #[must_use]
    pub fn quality(&self) -> &QualityConfig {
        &self.quality
    }

    pub fn segmenter(&self) -> Segmenter {
        Segmenter::new(
            self.rules.dialogue.clone(),
            self.rules.system.clone(),
            self.roster.clone(),
        )
    }

    pub fn classifier(&self) -> CharacterClassifier {
        CharacterClassifier::new(self.roster.clone(), self.rules.system.clone())
    }
}
