//! Request-scoped filtering and ordering of records.

use std::cmp::Ordering;

use crate::model::Record;

const RESTAURANTS: &str = "restaurants";
const DIRECTORY: &str = "directory";

/// Split a comma-separated category list into lowercase, trimmed needles.
fn needles(categories: &str) -> Vec<String> {
    let mut out: Vec<String> = categories
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn matches_any(haystack: &str, needles: &[String]) -> bool {
    let hay = haystack.to_lowercase();
    needles.iter().any(|n| hay.contains(n.as_str()))
}

/// Case-insensitive substring filter on a record's categories.
/// With `negate`, keeps only records matching none of the listed categories.
/// An empty or blank list keeps everything.
pub fn filter_by_categories(records: Vec<Record>, categories: &str, negate: bool) -> Vec<Record> {
    let needles = needles(categories);
    if needles.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| matches_any(&r.categories_joined(), &needles) != negate)
        .collect()
}

/// Same rule as [`filter_by_categories`], applied to bare category names.
pub fn filter_category_names(names: Vec<String>, categories: &str, negate: bool) -> Vec<String> {
    let needles = needles(categories);
    if needles.is_empty() {
        return names;
    }
    names
        .into_iter()
        .filter(|n| matches_any(n, &needles) != negate)
        .collect()
}

/// Coarse top-level grouping a caller can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainCategory {
    Restaurants,
    Directory,
}

impl MainCategory {
    /// Unknown or empty values mean "no main-category filter".
    pub fn parse(s: Option<&str>) -> Option<Self> {
        match s.map(str::trim) {
            Some(RESTAURANTS) => Some(Self::Restaurants),
            Some(DIRECTORY) => Some(Self::Directory),
            _ => None,
        }
    }

    fn negate(self) -> bool {
        matches!(self, Self::Directory)
    }

    pub fn apply(self, records: Vec<Record>) -> Vec<Record> {
        filter_by_categories(records, RESTAURANTS, self.negate())
    }

    pub fn apply_to_names(self, names: Vec<String>) -> Vec<String> {
        filter_category_names(names, RESTAURANTS, self.negate())
    }
}

/// Drop records farther than `max_meters`; unknown distance is always kept.
pub fn filter_by_distance(records: Vec<Record>, max_meters: u32) -> Vec<Record> {
    records
        .into_iter()
        .filter(|r| r.distance.map_or(true, |d| d <= max_meters))
        .collect()
}

fn cmp_nulls_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Distance ascending with unknown distances last; ties broken by
/// case-sensitive name with missing names last.
pub fn by_distance_then_name(a: &Record, b: &Record) -> Ordering {
    cmp_nulls_last(a.distance, b.distance)
        .then_with(|| cmp_nulls_last(a.name.as_deref(), b.name.as_deref()))
}

pub fn sort_by_distance(records: &mut [Record]) {
    records.sort_by(by_distance_then_name);
}
