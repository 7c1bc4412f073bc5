//! Direct and fuzzy matching
//!
//! Both phases only accept a match when the winning normalized title has
//! exactly one owner. Ambiguous titles are left unmatched rather than
//! guessed.

use super::index::TitleIndex;
use super::types::{CatalogRecord, ImportEntry, MatchInfo, MatchResult, MatchType, RecordId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Maximum edit distance accepted for a key of `len` characters
pub fn distance_threshold(len: usize) -> usize {
    (len / 5).clamp(1, 3)
}

/// Titles within `threshold` of the pattern's length sharing its first character
fn filter_candidates<'a, I>(titles: I, pattern: &str, threshold: usize) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let first = pattern.chars().next();
    let pattern_len = pattern.chars().count();

    titles
        .into_iter()
        .filter(|t| t.chars().count().abs_diff(pattern_len) <= threshold)
        .filter(|t| t.chars().next() == first)
        .collect()
}

/// Closest candidate within the distance threshold
///
/// Ties resolve to the earliest candidate, so callers pass candidates in
/// sorted order for deterministic results.
fn best_candidate<'a>(pattern: &str, candidates: &[&'a str]) -> Option<(&'a str, usize)> {
    let threshold = distance_threshold(pattern.chars().count());

    candidates
        .iter()
        .map(|c| (*c, strsim::levenshtein(pattern, c)))
        .fold(None::<(&'a str, usize)>, |best, (c, d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ => Some((c, d)),
        })
        .filter(|(_, d)| *d <= threshold)
}

/// Resolve unambiguous exact matches
pub fn match_direct(records: &[CatalogRecord], imports: &[ImportEntry]) -> MatchResult {
    let index = TitleIndex::build(records);
    let start = MatchResult {
        matches: BTreeMap::new(),
        unmatched_records: records.to_vec(),
        unmatched_imports: imports.to_vec(),
        remaining_index: index,
    };

    if records.is_empty() || imports.is_empty() {
        return start;
    }

    let by_id: HashMap<&str, &CatalogRecord> =
        records.iter().map(|r| (r.id.as_str(), r)).collect();
    let owners = start.remaining_index.owner_sets();

    let mut new_matches: BTreeMap<RecordId, MatchInfo> = BTreeMap::new();
    let mut matched_imports = BTreeSet::new();

    for (i, entry) in imports.iter().enumerate() {
        if entry.normalized.is_empty() {
            continue;
        }

        let Some(ids) = owners.get(&entry.normalized) else {
            continue;
        };
        if ids.len() != 1 {
            debug!(title = %entry.original, owners = ids.len(), "Ambiguous title left unmatched");
            continue;
        }

        let Some(id) = ids.iter().next() else {
            continue;
        };
        if new_matches.contains_key(id) {
            continue;
        }
        let Some(record) = by_id.get(id.as_str()) else {
            continue;
        };

        new_matches.insert(id.clone(), MatchInfo::new(record, entry, MatchType::Exact));
        matched_imports.insert(i);
    }

    start.consume(new_matches, &matched_imports)
}

/// Resolve remaining entries by bounded edit distance
///
/// Runs passes until one adds nothing. Within a pass, owner sets come from
/// the index as it stood at the start of that pass, so a match never
/// disambiguates another entry of the same pass; the next pass sees the
/// shrunken index. The result is therefore a fixpoint: calling this again
/// on its output changes nothing.
pub fn match_fuzzy(result: &MatchResult) -> MatchResult {
    let mut current = result.clone();
    while let Some(next) = fuzzy_pass(&current) {
        current = next;
    }
    current
}

/// One fuzzy pass; `None` when it matched nothing
fn fuzzy_pass(result: &MatchResult) -> Option<MatchResult> {
    let remaining = &result.remaining_index;
    if remaining.is_empty() || result.unmatched_imports.is_empty() {
        return None;
    }

    let by_id: HashMap<&str, &CatalogRecord> = result
        .unmatched_records
        .iter()
        .map(|r| (r.id.as_str(), r))
        .collect();
    let owners = remaining.owner_sets();

    let mut new_matches: BTreeMap<RecordId, MatchInfo> = BTreeMap::new();
    let mut matched_imports = BTreeSet::new();

    for (i, entry) in result.unmatched_imports.iter().enumerate() {
        let pattern = entry.normalized.as_str();
        if pattern.is_empty() {
            continue;
        }

        let threshold = distance_threshold(pattern.chars().count());
        let candidates = filter_candidates(
            remaining.all_titles.iter().map(String::as_str),
            pattern,
            threshold,
        );
        let Some((winner, distance)) = best_candidate(pattern, &candidates) else {
            continue;
        };

        let Some(ids) = owners.get(winner) else {
            continue;
        };
        if ids.len() != 1 {
            continue;
        }
        let Some(id) = ids.iter().next() else {
            continue;
        };
        if new_matches.contains_key(id) || result.matches.contains_key(id) {
            continue;
        }
        let Some(record) = by_id.get(id.as_str()) else {
            continue;
        };

        debug!(
            import = %entry.original,
            remote = %winner,
            distance,
            "Fuzzy match"
        );
        new_matches.insert(id.clone(), MatchInfo::new(record, entry, MatchType::Fuzzy));
        matched_imports.insert(i);
    }

    if new_matches.is_empty() {
        return None;
    }

    Some(result.consume(new_matches, &matched_imports))
}

/// Pick the record among search results that corresponds to `entry`
///
/// Exact normalized equality wins; otherwise the same bounded fuzzy
/// selection used by [`match_fuzzy`], accepted only when the winning title
/// belongs to a single result.
pub fn match_search_results<'a>(
    entry: &ImportEntry,
    results: &'a [CatalogRecord],
) -> Option<(&'a CatalogRecord, MatchInfo)> {
    if entry.normalized.is_empty() || results.is_empty() {
        return None;
    }

    let index = TitleIndex::build(results);

    // First result in search order carrying the exact key
    if let Some(record) = results.iter().find(|r| {
        index
            .titles_by_record
            .get(&r.id)
            .is_some_and(|titles| titles.contains(&entry.normalized))
    }) {
        return Some((record, MatchInfo::new(record, entry, MatchType::Exact)));
    }

    let pattern = entry.normalized.as_str();
    let threshold = distance_threshold(pattern.chars().count());
    let candidates = filter_candidates(
        index.all_titles.iter().map(String::as_str),
        pattern,
        threshold,
    );
    let (winner, _) = best_candidate(pattern, &candidates)?;

    let owners = index.owner_sets();
    let ids = owners.get(winner)?;
    if ids.len() != 1 {
        return None;
    }
    let id = ids.iter().next()?;
    let record = results.iter().find(|r| &r.id == id)?;

    Some((record, MatchInfo::new(record, entry, MatchType::Fuzzy)))
}
