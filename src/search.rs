//! Search dispatch across providers.
//!
//! A [`Searcher`] is the per-query handle: it carries the cooperative
//! cancellation flag and owns the shared result sink. The
//! [`SearchDispatcher`] walks the registry in registration order and lets
//! each ready provider push its matches into the searcher. Ranking and
//! deduplication across providers are left to the consumer of the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::entry::EntryItem;
use crate::provider::{Provider, ProviderKind};
use crate::registry::ProviderRegistry;

/// Per-query handle shared between the dispatcher and the providers.
#[derive(Debug)]
pub struct Searcher {
    cancelled: AtomicBool,
    max_results: usize,
    results: Mutex<Vec<EntryItem>>,
}

impl Searcher {
    /// Create a searcher that accepts at most `max_results` entries.
    pub fn new(max_results: usize) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            max_results,
            results: Mutex::new(Vec::new()),
        }
    }

    /// Request cancellation. Providers already running finish their call.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Offer results to the sink. Entries past capacity are dropped.
    /// Returns whether the sink will accept more results.
    pub fn add_results(&self, items: &[EntryItem]) -> bool {
        let mut results = self.results.lock();
        let room = self.max_results.saturating_sub(results.len());
        results.extend(items.iter().take(room).cloned());
        results.len() < self.max_results
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// Copy of the results collected so far, in arrival order.
    pub fn results(&self) -> Vec<EntryItem> {
        self.results.lock().clone()
    }

    /// Results sorted by descending relevance, stable for equal relevance.
    pub fn ranked_results(&self) -> Vec<EntryItem> {
        let mut results = self.results();
        results.sort_by(|a, b| b.relevance.cmp(&a.relevance));
        results
    }
}

/// Answers queries by asking each registered provider in order.
pub struct SearchDispatcher {
    registry: Arc<ProviderRegistry>,
    app_cache: RwLock<Option<Arc<dyn Provider>>>,
    last_query: Mutex<Option<String>>,
}

impl SearchDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            app_cache: RwLock::new(None),
            last_query: Mutex::new(None),
        }
    }

    /// Install the snapshot used while the app provider is still loading.
    pub fn set_app_cache(&self, cache: Option<Arc<dyn Provider>>) {
        *self.app_cache.write() = cache;
    }

    pub fn has_app_cache(&self) -> bool {
        self.app_cache.read().is_some()
    }

    /// The query most recently dispatched, used when recording history.
    pub fn last_query(&self) -> Option<String> {
        self.last_query.lock().clone()
    }

    /// Ask every ready provider for matches.
    ///
    /// Cancellation is checked before each provider is contacted. A provider
    /// that is absent or still loading is skipped, except the app provider,
    /// which is replaced by the cached snapshot when one is available.
    pub fn request_results(&self, query: &str, searcher: &Searcher) {
        *self.last_query.lock() = Some(query.to_string());

        for slot in self.registry.snapshot() {
            if searcher.is_cancelled() {
                tracing::debug!(query, "search cancelled");
                break;
            }

            let provider = match slot.ready() {
                Some(provider) => Arc::clone(provider),
                None if slot.name == ProviderKind::App.name() => match self.app_cache.read().clone() {
                    Some(cache) => cache,
                    None => continue,
                },
                None => continue,
            };

            provider.request_results(query, searcher);
        }
    }

    /// Offer every provider's full entry list, stopping as soon as the sink
    /// refuses more.
    pub fn request_all_records(&self, searcher: &Searcher) {
        for slot in self.registry.snapshot() {
            let Some(provider) = slot.provider else {
                continue;
            };
            let Some(entries) = provider.entries() else {
                continue;
            };
            if !searcher.add_results(&entries) {
                break;
            }
        }
    }
}
