//! Web search shortcuts: every configured engine offers to search the query.

use super::{LoadStep, Provider};
use crate::config::SearchEngineConfig;
use crate::entry::EntryItem;
use crate::search::Searcher;

const SCHEME: &str = "search-engine://";

/// Web searches sit below every real match.
const SEARCH_RELEVANCE: i64 = 10;

impl SearchEngineConfig {
    /// Whether the URL has a slot for the query.
    pub fn has_query_placeholder(&self) -> bool {
        self.url.contains("{query}") || self.url.contains("%s")
    }

    /// Substitute the URL-encoded query into the engine URL.
    pub fn resolve_url(&self, query: &str) -> String {
        let encoded = urlencoding::encode(query);
        self.url.replace("{query}", &encoded).replace("%s", &encoded)
    }
}

pub struct SearchEngineProvider {
    engines: Vec<SearchEngineConfig>,
}

impl SearchEngineProvider {
    pub fn new(engines: Vec<SearchEngineConfig>) -> Self {
        let engines = engines
            .into_iter()
            .filter(|engine| {
                let usable = engine.has_query_placeholder();
                if !usable {
                    tracing::warn!(engine = %engine.name, "search engine url has no query placeholder");
                }
                usable
            })
            .collect();
        Self { engines }
    }

    fn engine_entry(engine: &SearchEngineConfig) -> EntryItem {
        EntryItem::new(format!("{}{}", SCHEME, engine.name), engine.name.clone())
            .with_description(engine.url.clone())
    }
}

impl Provider for SearchEngineProvider {
    fn is_loaded(&self) -> bool {
        true
    }

    fn load_step(&self) -> LoadStep {
        LoadStep::FIRST
    }

    fn reload(&self, _force: bool) {}

    fn set_dirty(&self) {}

    fn request_results(&self, query: &str, searcher: &Searcher) {
        let query = query.trim();
        if query.is_empty() {
            return;
        }

        let results: Vec<EntryItem> = self
            .engines
            .iter()
            .map(|engine| {
                EntryItem::new(
                    format!("{}{}", SCHEME, engine.name),
                    format!("Search {} for \"{}\"", engine.name, query),
                )
                .with_description(engine.resolve_url(query))
                .with_relevance(SEARCH_RELEVANCE)
            })
            .collect();
        searcher.add_results(&results);
    }

    fn entries(&self) -> Option<Vec<EntryItem>> {
        Some(self.engines.iter().map(Self::engine_entry).collect())
    }

    fn may_find_by_id(&self, id: &str) -> bool {
        id.starts_with(SCHEME)
    }

    fn find_by_id(&self, id: &str) -> Option<EntryItem> {
        let name = id.strip_prefix(SCHEME)?;
        self.engines
            .iter()
            .find(|engine| engine.name == name)
            .map(Self::engine_entry)
    }
}
