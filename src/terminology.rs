use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug)]
pub struct TermEntry {
    pub src: String,
    pub tgt: String,
    pub category: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TermUpdate {
    pub src: String,
    pub tgt: String,
    pub category: Option<String>,
}

/// A registration that disagreed with the rendering already held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TermConflict {
    pub src: String,
    pub existing_tgt: String,
    pub proposed_tgt: String,
}

/// Authoritative source-term to target-term mapping.
///
/// The first rendering registered for a term wins; later disagreeing
/// registrations are reported as conflicts and ignored.
#[derive(Clone, Debug, Default)]
pub struct Glossary {
    terms: HashMap<String, TermEntry>,
}

impl Glossary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `{category: {src: tgt}}` tables.
    pub fn from_categories(
        categories: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> (Self, Vec<TermConflict>) {
        let mut glossary = Self::new();
        let updates = categories.iter().flat_map(|(category, terms)| {
            terms.iter().map(move |(src, tgt)| TermUpdate {
                src: src.clone(),
                tgt: tgt.clone(),
                category: Some(category.clone()),
            })
        });
        let conflicts = glossary.apply_updates(updates);
        (glossary, conflicts)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Register terms; the first rendering of a term is kept.
    pub fn apply_updates(
        &mut self,
        updates: impl IntoIterator<Item = TermUpdate>,
    ) -> Vec<TermConflict> {
        let mut conflicts = Vec::new();
        for up in updates {
            let src = up.src.trim();
            let tgt = up.tgt.trim();
            if src.is_empty() || tgt.is_empty() {
                continue;
            }

            match self.terms.get(src) {
                None => {
                    self.terms.insert(
                        src.to_string(),
                        TermEntry {
                            src: src.to_string(),
                            tgt: tgt.to_string(),
                            category: up
                                .category
                                .as_ref()
                                .map(|s| s.trim().to_string())
                                .filter(|s| !s.is_empty()),
                        },
                    );
                }
                Some(existing) if existing.tgt != tgt => conflicts.push(TermConflict {
                    src: src.to_string(),
                    existing_tgt: existing.tgt.clone(),
                    proposed_tgt: tgt.to_string(),
                }),
                Some(_) => {}
            }
        }
        conflicts
    }

    #[must_use]
    pub fn term_for(&self, src: &str) -> Option<&str> {
        self.terms.get(src.trim()).map(|t| t.tgt.as_str())
    }

    /// Entries sorted longest source first, then alphabetically.
    #[must_use]
    pub fn entries(&self) -> Vec<&TermEntry> {
        let mut items: Vec<&TermEntry> = self.terms.values().collect();
        items.sort_by(|a, b| b.src.len().cmp(&a.src.len()).then_with(|| a.src.cmp(&b.src)));
        items
    }

    /// Replace every source term left in `text` by its rendering, longest
    /// terms first so a phrase is not split by one of its words.
    pub fn substitute<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let mut out = Cow::Borrowed(text);
        for t in self.entries() {
            if out.contains(&t.src) {
                out = Cow::Owned(out.replace(&t.src, &t.tgt));
            }
        }
        out
    }

    /// Source terms present in `text` whose rendering is absent from it.
    #[must_use]
    pub fn untranslated_in<'a>(&'a self, text: &str) -> Vec<&'a TermEntry> {
        self.entries()
            .into_iter()
            .filter(|t| text.contains(&t.src) && !text.contains(&t.tgt))
            .collect()
    }
}
