//! Persistent store contract.
//!
//! The orchestration layer treats the store as an opaque durable backend.
//! Every operation is best-effort: writes report success with a `bool`,
//! reads return empty values on failure, nothing panics or propagates.

mod json;
mod ranking;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub use json::JsonStore;
pub use ranking::{UsageEntry, ADAPTIVE_WINDOW_HOURS, HALF_LIFE_DAYS};

use crate::quick_list::Position;

/// Ranking policy used when reading history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    /// Most recently used first.
    #[default]
    Recency,
    /// Most often used first.
    Frequency,
    /// Frequency weighted by exponential decay of age.
    Frecency,
    /// Uses within a short recent window.
    Adaptive,
}

impl HistoryMode {
    /// Map a settings value to a mode; unknown values fall back to recency.
    pub fn from_name(name: &str) -> Self {
        match name {
            "frecency" => HistoryMode::Frecency,
            "frequency" => HistoryMode::Frequency,
            "adaptive" => HistoryMode::Adaptive,
            _ => HistoryMode::Recency,
        }
    }
}

/// One ranked history row.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub id: String,
    /// Mode-specific score; only the order is meaningful.
    pub score: f64,
}

bitflags! {
    /// Per-item modification flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModFlags: u32 {
        const SHOW_IN_QUICK_LIST = 1;
        const PINNED = 1 << 1;
        const HIDDEN = 1 << 2;
        const CUSTOM_NAME = 1 << 3;
        const CUSTOM_ICON = 1 << 4;
    }
}

/// Persisted per-item metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModRecord {
    /// Entry id this record applies to.
    pub record: String,
    pub flags: ModFlags,
    pub position: Position,
    /// Custom display name, set together with [`ModFlags::CUSTOM_NAME`].
    pub name: Option<String>,
}

impl ModRecord {
    pub fn new(record: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            flags: ModFlags::empty(),
            position: Position::DEFAULT,
            name: None,
        }
    }

    pub fn add_flags(&mut self, flags: ModFlags) {
        self.flags.insert(flags);
    }

    pub fn clear_flags(&mut self, flags: ModFlags) {
        self.flags.remove(flags);
    }

    pub fn is_in_quick_list(&self) -> bool {
        self.flags.contains(ModFlags::SHOW_IN_QUICK_LIST)
    }

    /// A record with no flags at the default position carries nothing and
    /// should be deleted rather than stored.
    pub fn can_be_culled(&self) -> bool {
        self.flags.is_empty() && self.position == Position::DEFAULT
    }
}

/// A launcher shortcut pinned from another application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortcutRecord {
    /// Entry id, `shortcut://<package>/<name>`.
    pub id: String,
    pub package: String,
    pub display_name: String,
    /// What launching the shortcut opens.
    pub target: String,
}

impl ShortcutRecord {
    pub fn new(package: &str, name: &str, target: impl Into<String>) -> Self {
        Self {
            id: format!("shortcut://{}/{}", package, name),
            package: package.to_string(),
            display_name: name.to_string(),
            target: target.into(),
        }
    }
}

/// Operations the orchestration layer needs from durable storage.
pub trait DataStore: Send + Sync {
    /// Up to `limit` ids, best first under `mode`.
    fn history(&self, limit: usize, mode: HistoryMode) -> Vec<HistoryRecord>;
    /// Record a use of `id`, optionally with the query that found it.
    fn insert_history(&self, query: Option<&str>, id: &str) -> bool;
    fn clear_history(&self) -> bool;

    fn mods(&self) -> Vec<ModRecord>;
    fn mod_record(&self, id: &str) -> Option<ModRecord>;
    /// Insert or replace the record for `record.record`.
    fn set_mod(&self, record: &ModRecord) -> bool;
    fn remove_mod(&self, id: &str) -> bool;
    /// Move an existing record into the quick list at `position`.
    /// Returns `false` if no record exists for `id`.
    fn update_quick_list_position(&self, id: &str, position: Position) -> bool;

    fn shortcuts(&self) -> Vec<ShortcutRecord>;
    fn insert_shortcut(&self, record: &ShortcutRecord) -> bool;
    fn remove_shortcut(&self, id: &str) -> bool;
    /// Remove every shortcut of `package`, returning how many went.
    fn remove_shortcuts(&self, package: &str) -> usize;
    fn rename_shortcut(&self, id: &str, name: &str) -> bool;

    fn custom_name(&self, id: &str) -> Option<String>;
    fn set_custom_name(&self, id: &str, name: &str) -> bool;
    fn remove_custom_name(&self, id: &str) -> bool;

    fn custom_icon(&self, id: &str) -> Option<Vec<u8>>;
    fn set_custom_icon(&self, id: &str, icon: &[u8]) -> bool;
    fn remove_custom_icon(&self, id: &str) -> bool;
    fn cached_icon(&self, id: &str) -> Option<Vec<u8>>;
    fn set_cached_icon(&self, id: &str, icon: &[u8]) -> bool;

    fn tags(&self, id: &str) -> Vec<String>;
    fn set_tags(&self, id: &str, tags: &[String]) -> bool;
    /// Every distinct tag, sorted.
    fn all_tags(&self) -> Vec<String>;

    /// Write pending state to durable storage.
    fn flush(&self) -> bool {
        true
    }
}
