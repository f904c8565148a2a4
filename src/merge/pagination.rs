//! Appending fetched pages to a cached list.

use crate::types::Identified;
use std::collections::HashSet;

/// Append `page` to the tail of `existing`.
///
/// An absent or empty page is the terminal signal and leaves `existing`
/// untouched. Entries whose id is already present, in `existing` or
/// earlier in the page, are skipped. Returns the number appended.
pub fn merge_page<T: Identified>(existing: &mut Vec<T>, page: Option<Vec<T>>) -> usize {
    let Some(page) = page.filter(|p| !p.is_empty()) else {
        return 0;
    };

    let mut seen: HashSet<T::Key> = existing.iter().filter_map(|e| e.key()).collect();
    let before = existing.len();

    for entry in page {
        match entry.key() {
            Some(key) if !seen.insert(key) => continue,
            _ => existing.push(entry),
        }
    }

    existing.len() - before
}

/// Offset of the next page to fetch: the number of confirmed entries.
///
/// Placeholders are not rows of the authoritative source and must not
/// shift the offset window.
pub fn next_offset<T: Identified>(existing: &[T]) -> usize {
    existing.iter().filter(|e| e.key().is_some()).count()
}
