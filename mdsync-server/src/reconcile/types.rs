//! Reconciliation data model

use super::index::TitleIndex;
use super::normalize::normalize;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stable identifier of a remote catalog record
pub type RecordId = String;

/// Language-tagged titles of a record (language code -> text)
pub type LocalizedTitles = BTreeMap<String, String>;

/// Primary indexing language
const PRIMARY_LANGUAGE: &str = "en";
/// Suffix of romanized language tags (e.g. `ja-ro`)
const ROMANIZED_SUFFIX: &str = "-ro";

/// True for titles that take part in matching
pub fn is_indexed_language(language: &str) -> bool {
    language == PRIMARY_LANGUAGE || language.ends_with(ROMANIZED_SUFFIX)
}

/// One title from the uploaded list
///
/// The normalized key is computed once at ingestion and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntry {
    pub original: String,
    pub normalized: String,
}

impl ImportEntry {
    pub fn new(original: impl Into<String>) -> Self {
        let original = original.into();
        let normalized = normalize(&original);
        Self {
            original,
            normalized,
        }
    }

    pub fn from_titles<I, S>(titles: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        titles.into_iter().map(Self::new).collect()
    }
}

/// A followed item on the remote catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: RecordId,
    /// Primary title set
    #[serde(default)]
    pub title: LocalizedTitles,
    /// Alternate title sets
    #[serde(default)]
    pub alt_titles: Vec<LocalizedTitles>,
}

impl CatalogRecord {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            title: LocalizedTitles::new(),
            alt_titles: Vec::new(),
        }
    }

    pub fn with_title(mut self, language: &str, text: &str) -> Self {
        self.title.insert(language.to_string(), text.to_string());
        self
    }

    pub fn with_alt_title(mut self, language: &str, text: &str) -> Self {
        let mut alt = LocalizedTitles::new();
        alt.insert(language.to_string(), text.to_string());
        self.alt_titles.push(alt);
        self
    }

    /// Indexable titles as `(is_primary, text)` pairs
    pub fn indexed_titles(&self) -> impl Iterator<Item = (bool, &str)> {
        let primary = self
            .title
            .iter()
            .filter(|(lang, _)| is_indexed_language(lang))
            .map(|(_, text)| (true, text.as_str()));
        let alternate = self
            .alt_titles
            .iter()
            .flat_map(|alt| alt.iter())
            .filter(|(lang, _)| is_indexed_language(lang))
            .map(|(_, text)| (false, text.as_str()));
        primary.chain(alternate).filter(|(_, text)| !text.is_empty())
    }

    /// Human-friendly title for reporting
    ///
    /// Preference: primary English, primary romanized, alternate English,
    /// alternate romanized, any primary, any alternate.
    pub fn display_title(&self) -> &str {
        let non_empty = |t: &&String| !t.is_empty();

        self.title
            .get(PRIMARY_LANGUAGE)
            .filter(non_empty)
            .or_else(|| romanized(&self.title))
            .or_else(|| {
                self.alt_titles
                    .iter()
                    .find_map(|alt| alt.get(PRIMARY_LANGUAGE).filter(non_empty))
            })
            .or_else(|| self.alt_titles.iter().find_map(romanized))
            .or_else(|| self.title.values().find(non_empty))
            .or_else(|| {
                self.alt_titles
                    .iter()
                    .find_map(|alt| alt.values().find(non_empty))
            })
            .map(String::as_str)
            .unwrap_or("")
    }
}

fn romanized(titles: &LocalizedTitles) -> Option<&String> {
    titles
        .iter()
        .find(|(lang, text)| lang.ends_with(ROMANIZED_SUFFIX) && !text.is_empty())
        .map(|(_, text)| text)
}

/// How a match was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
}

/// One resolved correspondence between a remote record and an import entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub remote_title: String,
    pub import_title: String,
    pub match_type: MatchType,
}

impl MatchInfo {
    pub fn new(record: &CatalogRecord, entry: &ImportEntry, match_type: MatchType) -> Self {
        Self {
            remote_title: record.display_title().to_string(),
            import_title: entry.original.clone(),
            match_type,
        }
    }
}

/// Output of one matching phase, input of the next
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// A record id appears here at most once and is never overwritten
    pub matches: BTreeMap<RecordId, MatchInfo>,
    pub unmatched_records: Vec<CatalogRecord>,
    pub unmatched_imports: Vec<ImportEntry>,
    /// Index over `unmatched_records` only
    pub remaining_index: TitleIndex,
}

impl MatchResult {
    /// Drop consumed records and entries, rebuilding the index
    pub(crate) fn consume(
        &self,
        new_matches: BTreeMap<RecordId, MatchInfo>,
        matched_imports: &BTreeSet<usize>,
    ) -> MatchResult {
        let matched_ids: BTreeSet<RecordId> = new_matches.keys().cloned().collect();

        let mut matches = self.matches.clone();
        for (id, info) in new_matches {
            matches.entry(id).or_insert(info);
        }

        MatchResult {
            matches,
            unmatched_records: self
                .unmatched_records
                .iter()
                .filter(|r| !matched_ids.contains(&r.id))
                .cloned()
                .collect(),
            unmatched_imports: self
                .unmatched_imports
                .iter()
                .enumerate()
                .filter(|(i, _)| !matched_imports.contains(i))
                .map(|(_, e)| e.clone())
                .collect(),
            remaining_index: self.remaining_index.rebuild(&matched_ids),
        }
    }

    /// Number of matches of the given kind
    pub fn count(&self, match_type: MatchType) -> usize {
        self.matches
            .values()
            .filter(|m| m.match_type == match_type)
            .count()
    }
}
