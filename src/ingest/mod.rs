// src/ingest/mod.rs
pub mod config;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod types;

use crate::model::{Record, RecordId};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashSet};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_calls_total", "Provider calls issued.");
        describe_counter!(
            "fetch_provider_errors_total",
            "Provider calls that failed or panicked."
        );
        describe_counter!("fetch_timeouts_total", "Provider calls that timed out.");
        describe_histogram!(
            "fetch_merged_records",
            "Records left after merging one fetch batch."
        );
        describe_counter!("cache_hits_total", "Queries answered from the ingest cache.");
        describe_counter!(
            "cache_misses_total",
            "Queries that had to go to the providers."
        );
        describe_counter!(
            "ingest_items_persisted_total",
            "Bulk-ingest category items written to the store."
        );
        describe_counter!(
            "ingest_persist_errors_total",
            "Bulk-ingest category items that failed to persist."
        );
        describe_counter!(
            "ingest_completed_total",
            "Bulk ingests that reached READY."
        );
        describe_gauge!("ingest_queue_depth", "Items waiting for the persistence consumer.");
    });
}

/// Normalize provider text: decode HTML entities, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&decoded, " ").trim().to_string()
}

/// Normalize the text fields of a provider record in place. Empty names and
/// categories are dropped.
pub fn normalize_record(mut r: Record) -> Record {
    r.name = r
        .name
        .as_deref()
        .map(normalize_text)
        .filter(|n| !n.is_empty());
    r.categories = r
        .categories
        .iter()
        .map(|c| normalize_text(c))
        .filter(|c| !c.is_empty())
        .collect();
    r
}

/// Normalize search terms, dropping blanks and later duplicates.
pub fn normalize_terms<I, S>(terms: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for t in terms {
        let t = normalize_text(t.as_ref());
        if !t.is_empty() && seen.insert(t.clone()) {
            out.push(t);
        }
    }
    out
}

/// Merge batches into one set keyed by (external id, source). Batches are
/// visited in order and the first record seen for a key wins. Returns the
/// merged records plus the number of duplicates collapsed.
pub fn merge_dedup<I>(batches: I) -> (Vec<Record>, usize)
where
    I: IntoIterator<Item = Vec<Record>>,
{
    let mut merged: BTreeMap<RecordId, Record> = BTreeMap::new();
    let mut dups = 0usize;
    for batch in batches {
        for r in batch {
            let r = normalize_record(r);
            match merged.entry(r.id()) {
                std::collections::btree_map::Entry::Vacant(slot) => {
                    slot.insert(r);
                }
                std::collections::btree_map::Entry::Occupied(_) => dups += 1,
            }
        }
    }
    (merged.into_values().collect(), dups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;

    #[test]
    fn normalize_text_decodes_and_collapses() {
        assert_eq!(normalize_text("  Joe&#39;s&nbsp;&nbsp; Pizza \n"), "Joe's Pizza");
        assert_eq!(normalize_text("Bar &amp; Grill"), "Bar & Grill");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn terms_keep_first_seen_order() {
        let t = normalize_terms(["pizza", " sushi ", "", "pizza", "tacos"]);
        assert_eq!(t, vec!["pizza", "sushi", "tacos"]);
    }

    #[test]
    fn merge_collapses_same_id_and_source_only() {
        let a = vec![
            Record::new("42", Source::Google).named("First"),
            Record::new("7", Source::YellowPages).named("Seven"),
        ];
        let b = vec![
            Record::new("42", Source::Google).named("Second"),
            Record::new("42", Source::YellowPages).named("Other source"),
        ];
        let (merged, dups) = merge_dedup(vec![a, b]);
        assert_eq!(dups, 1);
        let keys: Vec<_> = merged
            .iter()
            .map(|r| (r.external_id.as_str(), r.source, r.name.as_deref().unwrap()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("42", Source::YellowPages, "Other source"),
                ("42", Source::Google, "First"),
                ("7", Source::YellowPages, "Seven"),
            ]
        );
    }
}
