//! List-backed provider.
//!
//! Holds a flat list of entries produced by a loader function and answers
//! queries by fuzzy matching names, descriptions and tags. Used for the
//! in-process sources (filters, actions, tags, mods, quick list, shortcuts)
//! and for the cached app snapshot.

use std::sync::Arc;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use parking_lot::RwLock;

use super::{LoadStep, Provider};
use crate::entry::EntryItem;
use crate::events::{EventBus, LoadEvent};
use crate::search::Searcher;

/// Produces the provider's entries on every (re)load.
pub type Loader = Arc<dyn Fn() -> Vec<EntryItem> + Send + Sync + 'static>;

#[derive(Default)]
struct ListState {
    entries: Vec<EntryItem>,
    loaded: bool,
    dirty: bool,
}

pub struct ListProvider {
    name: String,
    step: LoadStep,
    schemes: Vec<String>,
    loader: Loader,
    events: Option<EventBus>,
    matcher: SkimMatcherV2,
    state: RwLock<ListState>,
}

impl ListProvider {
    /// Create an unloaded provider. `schemes` are the id prefixes (without
    /// `://`) this provider answers `find_by_id` for.
    pub fn new(
        name: impl Into<String>,
        step: LoadStep,
        schemes: &[&str],
        loader: Loader,
        events: Option<EventBus>,
    ) -> Self {
        Self {
            name: name.into(),
            step,
            schemes: schemes.iter().map(|s| format!("{}://", s)).collect(),
            loader,
            events,
            matcher: SkimMatcherV2::default(),
            state: RwLock::new(ListState::default()),
        }
    }

    /// A provider that is loaded from the start with a fixed list.
    pub fn snapshot(
        name: impl Into<String>,
        step: LoadStep,
        schemes: &[&str],
        entries: Vec<EntryItem>,
    ) -> Self {
        let fixed = entries.clone();
        let provider = Self::new(name, step, schemes, Arc::new(move || fixed.clone()), None);
        {
            let mut state = provider.state.write();
            state.entries = entries;
            state.loaded = true;
        }
        provider
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    fn score(&self, entry: &EntryItem, query_lower: &str) -> Option<i64> {
        let name_lower = entry.name.to_lowercase();
        let name_score = self.matcher.fuzzy_match(&name_lower, query_lower);

        let tag_score = entry
            .tags
            .iter()
            .filter_map(|tag| self.matcher.fuzzy_match(&tag.to_lowercase(), query_lower))
            .max();

        // Weight description matches lower
        let desc_score = entry
            .description
            .as_ref()
            .and_then(|d| self.matcher.fuzzy_match(&d.to_lowercase(), query_lower))
            .map(|s| s / 2);

        let best = [name_score, tag_score, desc_score].into_iter().flatten().max()?;

        let prefix_boost = if name_lower.starts_with(query_lower) {
            100
        } else {
            0
        };
        Some(best + prefix_boost)
    }
}

impl Provider for ListProvider {
    fn is_loaded(&self) -> bool {
        let state = self.state.read();
        state.loaded && !state.dirty
    }

    fn load_step(&self) -> LoadStep {
        self.step
    }

    fn reload(&self, force: bool) {
        if !force && self.is_loaded() {
            return;
        }

        let entries = (self.loader)();
        tracing::debug!(provider = %self.name, count = entries.len(), "provider loaded");
        {
            let mut state = self.state.write();
            state.entries = entries;
            state.loaded = true;
            state.dirty = false;
        }

        if let Some(events) = &self.events {
            events.publish(LoadEvent::ProviderProgressed {
                provider: self.name.clone(),
            });
        }
    }

    fn set_dirty(&self) {
        self.state.write().dirty = true;
    }

    fn request_results(&self, query: &str, searcher: &Searcher) {
        let query_lower = query.trim().to_lowercase();
        if query_lower.is_empty() {
            return;
        }

        let mut scored: Vec<EntryItem> = {
            let state = self.state.read();
            state
                .entries
                .iter()
                .filter_map(|entry| {
                    self.score(entry, &query_lower)
                        .map(|score| entry.clone().with_relevance(score))
                })
                .collect()
        };
        scored.sort_by(|a, b| b.relevance.cmp(&a.relevance));

        searcher.add_results(&scored);
    }

    fn entries(&self) -> Option<Vec<EntryItem>> {
        let state = self.state.read();
        state.loaded.then(|| state.entries.clone())
    }

    fn may_find_by_id(&self, id: &str) -> bool {
        self.schemes.iter().any(|scheme| id.starts_with(scheme.as_str()))
    }

    fn find_by_id(&self, id: &str) -> Option<EntryItem> {
        self.state
            .read()
            .entries
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }
}
