//! Title index over remote catalog records
//!
//! The index is never mutated after construction. Shrinking it produces a
//! fresh structure via [`TitleIndex::rebuild`], so a caller holding the old
//! index keeps a consistent view.

use super::normalize::normalize;
use super::types::{CatalogRecord, RecordId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Lookup structures keyed by normalized title
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleIndex {
    /// Normalized primary title -> record
    pub by_main_title: HashMap<String, RecordId>,
    /// Normalized alternate title -> record
    pub by_alt_title: HashMap<String, RecordId>,
    /// Record -> every normalized title it carries (authoritative)
    pub titles_by_record: HashMap<RecordId, Vec<String>>,
    /// Deduplicated set of all normalized titles, sorted
    pub all_titles: BTreeSet<String>,
}

/// Normalized title -> set of records carrying it
pub type OwnerSets = BTreeMap<String, BTreeSet<RecordId>>;

impl TitleIndex {
    /// Index the English and romanized titles of `records`
    pub fn build(records: &[CatalogRecord]) -> Self {
        let mut index = TitleIndex::default();

        for record in records {
            let mut collected = Vec::new();

            for (is_primary, text) in record.indexed_titles() {
                let key = normalize(text);
                if key.is_empty() {
                    continue;
                }

                let map = if is_primary {
                    &mut index.by_main_title
                } else {
                    &mut index.by_alt_title
                };
                map.insert(key.clone(), record.id.clone());
                index.all_titles.insert(key.clone());
                collected.push(key);
            }

            if !collected.is_empty() {
                index
                    .titles_by_record
                    .entry(record.id.clone())
                    .or_default()
                    .extend(collected);
            }
        }

        index
    }

    /// Fresh index without any entry owned by `excluded`
    pub fn rebuild(&self, excluded: &BTreeSet<RecordId>) -> Self {
        let keep = |id: &RecordId| !excluded.contains(id);

        let by_main_title: HashMap<_, _> = self
            .by_main_title
            .iter()
            .filter(|(_, id)| keep(*id))
            .map(|(k, id)| (k.clone(), id.clone()))
            .collect();
        let by_alt_title: HashMap<_, _> = self
            .by_alt_title
            .iter()
            .filter(|(_, id)| keep(*id))
            .map(|(k, id)| (k.clone(), id.clone()))
            .collect();
        let titles_by_record: HashMap<_, _> = self
            .titles_by_record
            .iter()
            .filter(|(id, _)| keep(*id))
            .map(|(id, titles)| (id.clone(), titles.clone()))
            .collect();

        let all_titles = by_main_title
            .keys()
            .chain(by_alt_title.keys())
            .chain(titles_by_record.values().flatten())
            .cloned()
            .collect();

        Self {
            by_main_title,
            by_alt_title,
            titles_by_record,
            all_titles,
        }
    }

    /// Invert `titles_by_record` into owner sets
    pub fn owner_sets(&self) -> OwnerSets {
        let mut owners = OwnerSets::new();
        for (id, titles) in &self.titles_by_record {
            for title in titles {
                owners.entry(title.clone()).or_default().insert(id.clone());
            }
        }
        owners
    }

    pub fn is_empty(&self) -> bool {
        self.all_titles.is_empty()
    }
}
