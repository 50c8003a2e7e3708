//! Quick-list positioning.
//!
//! Quick-list order is kept as a sparse integer sequence: the n-th item sits
//! at `1 + 11 * n`, leaving gaps for later insertions. The integer only turns
//! into its fixed-width hex key when it is written to the store.

use std::collections::HashMap;
use std::fmt;

use crate::store::{DataStore, ModFlags, ModRecord};

/// Sparse quick-list position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position(pub u32);

impl Position {
    /// Position of a record that is not in the quick list.
    pub const DEFAULT: Position = Position(0);
    pub const FIRST: Position = Position(1);
    /// Distance between consecutive assigned positions.
    pub const STEP: u32 = 11;

    /// The position `index` steps after this one.
    pub const fn nth(self, index: u32) -> Position {
        Position(self.0 + index * Self::STEP)
    }

    /// 8-digit lowercase hex key used by the store.
    pub fn to_key(self) -> String {
        format!("{:08x}", self.0)
    }

    pub fn from_key(key: &str) -> Option<Position> {
        u32::from_str_radix(key, 16).ok().map(Position)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

/// Store `ids` as the quick list, in order.
///
/// Existing records are moved rather than duplicated. Records that drop out
/// of the list lose the quick-list flag and are culled once they carry
/// nothing else. Refreshing the providers that read mods is the caller's job.
pub fn set_quick_list(store: &dyn DataStore, ids: &[String]) {
    let mut old: HashMap<String, ModRecord> = store
        .mods()
        .into_iter()
        .map(|record| (record.record.clone(), record))
        .collect();

    let mut position = Position::FIRST;
    for id in ids {
        old.remove(id);
        if !store.update_quick_list_position(id, position) {
            let mut record = ModRecord::new(id.as_str());
            record.add_flags(ModFlags::SHOW_IN_QUICK_LIST);
            record.position = position;
            if !store.set_mod(&record) {
                tracing::warn!(id = %id, "failed to add quick list record");
            }
        }
        position = position.nth(1);
    }

    for (id, mut record) in old {
        if record.is_in_quick_list() {
            record.clear_flags(ModFlags::SHOW_IN_QUICK_LIST);
            record.position = Position::DEFAULT;
            if record.can_be_culled() {
                store.remove_mod(&id);
            } else {
                store.set_mod(&record);
            }
        } else if record.can_be_culled() {
            store.remove_mod(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonStore;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn position_of(store: &JsonStore, id: &str) -> Option<Position> {
        store
            .mod_record(id)
            .filter(|r| r.is_in_quick_list())
            .map(|r| r.position)
    }

    #[test]
    fn test_keys() {
        assert_eq!(Position::FIRST.to_key(), "00000001");
        assert_eq!(Position(23).to_key(), "00000017");
        assert_eq!(Position::from_key("0000000c"), Some(Position(12)));
        assert_eq!(Position::from_key("zz"), None);
        assert_eq!(Position::FIRST.nth(2), Position(23));
    }

    #[test]
    fn test_positions_step_by_eleven() {
        let store = JsonStore::in_memory();
        set_quick_list(&store, &ids(&["a", "b", "c"]));

        assert_eq!(position_of(&store, "a"), Some(Position(1)));
        assert_eq!(position_of(&store, "b"), Some(Position(12)));
        assert_eq!(position_of(&store, "c"), Some(Position(23)));
    }

    #[test]
    fn test_reorder_culls_dropped() {
        let store = JsonStore::in_memory();
        set_quick_list(&store, &ids(&["a", "b", "c"]));
        set_quick_list(&store, &ids(&["b", "a"]));

        assert_eq!(position_of(&store, "b"), Some(Position(1)));
        assert_eq!(position_of(&store, "a"), Some(Position(12)));
        assert!(store.mod_record("c").is_none());
        assert_eq!(store.mods().len(), 2);
    }

    #[test]
    fn test_dropped_record_keeps_other_flags() {
        let store = JsonStore::in_memory();
        set_quick_list(&store, &ids(&["a", "c"]));
        let mut pinned = store.mod_record("c").unwrap();
        pinned.add_flags(ModFlags::PINNED);
        store.set_mod(&pinned);

        set_quick_list(&store, &ids(&["a"]));

        let record = store.mod_record("c").unwrap();
        assert!(!record.is_in_quick_list());
        assert_eq!(record.flags, ModFlags::PINNED);
    }

    #[test]
    fn test_existing_record_not_duplicated() {
        let store = JsonStore::in_memory();
        let mut hidden = ModRecord::new("a");
        hidden.add_flags(ModFlags::HIDDEN);
        store.set_mod(&hidden);

        set_quick_list(&store, &ids(&["a"]));

        let mods = store.mods();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].flags, ModFlags::HIDDEN | ModFlags::SHOW_IN_QUICK_LIST);
    }

    #[test]
    fn test_idempotent() {
        let store = JsonStore::in_memory();
        set_quick_list(&store, &ids(&["x", "y", "z"]));
        let first = store.mods();
        set_quick_list(&store, &ids(&["x", "y", "z"]));
        assert_eq!(store.mods(), first);
    }
}
