//! History ranking: turns ranked ids from the store into live entries.

use std::collections::HashSet;

use crate::entry::EntryItem;
use crate::registry::ProviderRegistry;
use crate::store::{DataStore, HistoryMode};

/// Resolve up to `item_count` history entries.
///
/// The store is asked for `item_count + exclude.len()` ids to make room for
/// exclusions. That is a heuristic: unresolvable ids are dropped too, so the
/// result can be shorter than `item_count` even when more history exists.
pub fn get_history(
    registry: &ProviderRegistry,
    store: &dyn DataStore,
    item_count: usize,
    mode: HistoryMode,
    sort_alphabetically: bool,
    exclude: &HashSet<String>,
) -> Vec<EntryItem> {
    let records = store.history(item_count + exclude.len(), mode);

    let mut entries: Vec<EntryItem> = records
        .into_iter()
        .filter(|record| !exclude.contains(&record.id))
        .filter_map(|record| registry.find_by_id(&record.id))
        .collect();

    if sort_alphabetically {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
    }

    entries.truncate(item_count);
    entries
}
