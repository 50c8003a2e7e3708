//! JSON-file store.
//!
//! State lives in memory behind a mutex and is written back to a single JSON
//! file after every mutation. A mutation whose write fails is rolled back,
//! so memory never holds changes the file lacks. A store without a path is
//! purely in-memory.
//! Quick-list positions are encoded as fixed-width hex keys only here, at
//! the persistence boundary.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::ranking::{self, now_millis, UsageEntry};
use super::{DataStore, HistoryMode, HistoryRecord, ModFlags, ModRecord, ShortcutRecord};
use crate::error::DataResult;
use crate::quick_list::Position;

/// Mod record as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMod {
    flags: u32,
    /// Fixed-width hex position key.
    position: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl StoredMod {
    fn from_record(record: &ModRecord) -> Self {
        Self {
            flags: record.flags.bits(),
            position: record.position.to_key(),
            name: record.name.clone(),
        }
    }

    fn to_record(&self, id: &str) -> ModRecord {
        ModRecord {
            record: id.to_string(),
            flags: ModFlags::from_bits_truncate(self.flags),
            position: Position::from_key(&self.position).unwrap_or(Position::DEFAULT),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoreData {
    history: HashMap<String, UsageEntry>,
    next_seq: u64,
    mods: BTreeMap<String, StoredMod>,
    shortcuts: Vec<ShortcutRecord>,
    custom_icons: HashMap<String, Vec<u8>>,
    icon_cache: HashMap<String, Vec<u8>>,
    tags: BTreeMap<String, Vec<String>>,
}

impl StoreData {
    fn mod_record(&self, id: &str) -> Option<ModRecord> {
        self.mods.get(id).map(|stored| stored.to_record(id))
    }

    fn put_mod(&mut self, record: &ModRecord) {
        self.mods
            .insert(record.record.clone(), StoredMod::from_record(record));
    }

    /// Store the record, or delete it if it no longer carries anything.
    fn put_or_cull(&mut self, record: &ModRecord) {
        if record.can_be_culled() {
            self.mods.remove(&record.record);
        } else {
            self.put_mod(record);
        }
    }
}

pub struct JsonStore {
    path: Option<PathBuf>,
    data: Mutex<StoreData>,
}

impl JsonStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StoreData::default()),
        }
    }

    /// Open (or create) the store at `path`. A corrupt file is logged and
    /// replaced by an empty store on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut data = match Self::read(&path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read store, starting empty");
                StoreData::default()
            }
        };

        let now = now_millis();
        let before = data.history.len();
        data.history.retain(|_, entry| !entry.is_expired(now));
        if data.history.len() != before {
            tracing::debug!(pruned = before - data.history.len(), "pruned old history");
        }

        Self {
            path: Some(path),
            data: Mutex::new(data),
        }
    }

    /// Default location for the store file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("nova").join("data.json"))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(path: &Path) -> DataResult<StoreData> {
        if !path.exists() {
            return Ok(StoreData::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write(path: &Path, data: &StoreData) -> DataResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(data)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Persist the current state. Failures are logged and reported as `false`.
    fn persist(&self, data: &StoreData) -> bool {
        let Some(path) = &self.path else {
            return true;
        };
        match Self::write(path, data) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to write store");
                false
            }
        }
    }

    /// Apply `f` and persist if it reports a change. On a failed write the
    /// in-memory state is left as it was.
    fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut StoreData) -> bool,
    {
        let mut data = self.data.lock();
        if self.path.is_none() {
            return f(&mut data);
        }

        let mut staged = data.clone();
        if !f(&mut staged) || !self.persist(&staged) {
            return false;
        }
        *data = staged;
        true
    }
}

impl DataStore for JsonStore {
    fn history(&self, limit: usize, mode: HistoryMode) -> Vec<HistoryRecord> {
        let data = self.data.lock();
        ranking::rank(&data.history, mode, limit, now_millis())
    }

    fn insert_history(&self, query: Option<&str>, id: &str) -> bool {
        let now = now_millis();
        self.mutate(|data| {
            data.next_seq += 1;
            let seq = data.next_seq;
            data.history
                .entry(id.to_string())
                .and_modify(|e| e.record_usage(now, seq, query))
                .or_insert_with(|| UsageEntry::new(now, seq, query));
            true
        })
    }

    fn clear_history(&self) -> bool {
        self.mutate(|data| {
            data.history.clear();
            true
        })
    }

    fn mods(&self) -> Vec<ModRecord> {
        let data = self.data.lock();
        data.mods
            .iter()
            .map(|(id, stored)| stored.to_record(id))
            .collect()
    }

    fn mod_record(&self, id: &str) -> Option<ModRecord> {
        self.data.lock().mod_record(id)
    }

    fn set_mod(&self, record: &ModRecord) -> bool {
        self.mutate(|data| {
            data.put_mod(record);
            true
        })
    }

    fn remove_mod(&self, id: &str) -> bool {
        self.mutate(|data| data.mods.remove(id).is_some())
    }

    fn update_quick_list_position(&self, id: &str, position: Position) -> bool {
        self.mutate(|data| match data.mod_record(id) {
            Some(mut record) => {
                record.position = position;
                record.add_flags(ModFlags::SHOW_IN_QUICK_LIST);
                data.put_mod(&record);
                true
            }
            None => false,
        })
    }

    fn shortcuts(&self) -> Vec<ShortcutRecord> {
        self.data.lock().shortcuts.clone()
    }

    fn insert_shortcut(&self, record: &ShortcutRecord) -> bool {
        self.mutate(|data| {
            if data.shortcuts.iter().any(|s| s.id == record.id) {
                return false;
            }
            data.shortcuts.push(record.clone());
            true
        })
    }

    fn remove_shortcut(&self, id: &str) -> bool {
        self.mutate(|data| {
            let before = data.shortcuts.len();
            data.shortcuts.retain(|s| s.id != id);
            data.shortcuts.len() != before
        })
    }

    fn remove_shortcuts(&self, package: &str) -> usize {
        let mut removed = 0;
        let saved = self.mutate(|data| {
            let before = data.shortcuts.len();
            data.shortcuts.retain(|s| s.package != package);
            removed = before - data.shortcuts.len();
            removed > 0
        });
        if saved {
            removed
        } else {
            0
        }
    }

    fn rename_shortcut(&self, id: &str, name: &str) -> bool {
        self.mutate(|data| match data.shortcuts.iter_mut().find(|s| s.id == id) {
            Some(shortcut) => {
                shortcut.display_name = name.to_string();
                true
            }
            None => false,
        })
    }

    fn custom_name(&self, id: &str) -> Option<String> {
        self.data.lock().mod_record(id).and_then(|record| record.name)
    }

    fn set_custom_name(&self, id: &str, name: &str) -> bool {
        self.mutate(|data| {
            let mut record = data.mod_record(id).unwrap_or_else(|| ModRecord::new(id));
            record.name = Some(name.to_string());
            record.add_flags(ModFlags::CUSTOM_NAME);
            data.put_mod(&record);
            true
        })
    }

    fn remove_custom_name(&self, id: &str) -> bool {
        self.mutate(|data| match data.mod_record(id) {
            Some(mut record) if record.flags.contains(ModFlags::CUSTOM_NAME) => {
                record.name = None;
                record.clear_flags(ModFlags::CUSTOM_NAME);
                data.put_or_cull(&record);
                true
            }
            _ => false,
        })
    }

    fn custom_icon(&self, id: &str) -> Option<Vec<u8>> {
        self.data.lock().custom_icons.get(id).cloned()
    }

    fn set_custom_icon(&self, id: &str, icon: &[u8]) -> bool {
        self.mutate(|data| {
            data.custom_icons.insert(id.to_string(), icon.to_vec());
            let mut record = data.mod_record(id).unwrap_or_else(|| ModRecord::new(id));
            record.add_flags(ModFlags::CUSTOM_ICON);
            data.put_mod(&record);
            true
        })
    }

    fn remove_custom_icon(&self, id: &str) -> bool {
        self.mutate(|data| {
            let removed = data.custom_icons.remove(id).is_some();
            if let Some(mut record) = data.mod_record(id) {
                record.clear_flags(ModFlags::CUSTOM_ICON);
                data.put_or_cull(&record);
            }
            removed
        })
    }

    fn cached_icon(&self, id: &str) -> Option<Vec<u8>> {
        self.data.lock().icon_cache.get(id).cloned()
    }

    fn set_cached_icon(&self, id: &str, icon: &[u8]) -> bool {
        self.mutate(|data| {
            data.icon_cache.insert(id.to_string(), icon.to_vec());
            true
        })
    }

    fn tags(&self, id: &str) -> Vec<String> {
        self.data.lock().tags.get(id).cloned().unwrap_or_default()
    }

    fn set_tags(&self, id: &str, tags: &[String]) -> bool {
        self.mutate(|data| {
            let unique: BTreeSet<String> = tags
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            if unique.is_empty() {
                data.tags.remove(id);
            } else {
                data.tags.insert(id.to_string(), unique.into_iter().collect());
            }
            true
        })
    }

    fn all_tags(&self) -> Vec<String> {
        let data = self.data.lock();
        let all: BTreeSet<&String> = data.tags.values().flatten().collect();
        all.into_iter().cloned().collect()
    }

    fn flush(&self) -> bool {
        let data = self.data.lock();
        self.persist(&data)
    }
}
