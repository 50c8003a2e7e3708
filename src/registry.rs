//! Provider registry: the single source of truth for which sources exist.
//!
//! Entries live in an insertion-ordered map behind one `RwLock`. Mutations
//! come from the bookkeeping executor; search threads read through
//! [`ProviderRegistry::snapshot`], which clones the provider handles out so
//! no lock is held while a provider runs.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::connector::ServiceConnection;
use crate::entry::EntryItem;
use crate::provider::{LoadStep, Provider};

/// A registry slot.
pub struct ProviderEntry {
    /// Backing implementation, absent until the connection is bound.
    pub provider: Option<Arc<dyn Provider>>,

    /// Connection handle for service providers.
    pub connection: Option<ServiceConnection>,
}

impl ProviderEntry {
    /// Slot for a service whose binding has not completed yet.
    pub fn pending() -> Self {
        Self {
            provider: None,
            connection: None,
        }
    }

    /// Slot for an in-process provider with no connection.
    pub fn inline(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider: Some(provider),
            connection: None,
        }
    }

    pub fn load_step(&self) -> Option<LoadStep> {
        self.provider.as_ref().map(|p| p.load_step())
    }

    pub fn is_loaded(&self) -> bool {
        self.provider.as_ref().is_some_and(|p| p.is_loaded())
    }
}

/// Read-only view of one slot, detached from the registry lock.
#[derive(Clone)]
pub struct ProviderSlot {
    pub name: String,
    pub provider: Option<Arc<dyn Provider>>,
}

impl ProviderSlot {
    /// Provider handle if bound and loaded.
    pub fn ready(&self) -> Option<&Arc<dyn Provider>> {
        self.provider.as_ref().filter(|p| p.is_loaded())
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<IndexMap<String, ProviderEntry>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. The first registration for a name wins; later calls
    /// return `false` and leave the existing entry untouched.
    pub fn register(&self, name: &str, entry: ProviderEntry) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            tracing::debug!(provider = %name, "already registered");
            return false;
        }
        entries.insert(name.to_string(), entry);
        true
    }

    /// Install a bound provider into an existing pending slot. If the slot is
    /// gone (disconnected meanwhile) the connection is handed back.
    pub fn install(
        &self,
        name: &str,
        provider: Arc<dyn Provider>,
        connection: ServiceConnection,
    ) -> Result<(), ServiceConnection> {
        let mut entries = self.entries.write();
        match entries.get_mut(name) {
            Some(entry) => {
                entry.provider = Some(provider);
                entry.connection = Some(connection);
                Ok(())
            }
            None => Err(connection),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.entries
            .read()
            .get(name)
            .and_then(|entry| entry.provider.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Remove an entry, preserving the order of the others.
    pub fn remove(&self, name: &str) -> Option<ProviderEntry> {
        self.entries.write().shift_remove(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Detached copy of every slot in registration order.
    pub fn snapshot(&self) -> Vec<ProviderSlot> {
        self.entries
            .read()
            .iter()
            .map(|(name, entry)| ProviderSlot {
                name: name.clone(),
                provider: entry.provider.clone(),
            })
            .collect()
    }

    /// Visit every slot in registration order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, Option<&Arc<dyn Provider>>),
    {
        for slot in self.snapshot() {
            f(&slot.name, slot.provider.as_ref());
        }
    }

    /// Resolve an id. The first provider, in registration order, that claims
    /// it may know the id answers, even if it then finds nothing.
    pub fn find_by_id(&self, id: &str) -> Option<EntryItem> {
        for slot in self.snapshot() {
            if let Some(provider) = slot.provider {
                if provider.may_find_by_id(id) {
                    return provider.find_by_id(id);
                }
            }
        }
        None
    }
}
