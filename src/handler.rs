//! The data handler: one owner for every orchestration component.
//!
//! Construction is the application start point: it spawns the bookkeeping
//! executor, registers the providers and begins the first load generation.
//! [`DataHandler::shutdown`] is the teardown point. Registry mutations and
//! load checks always run on the executor; queries, history and store
//! operations run on the caller's thread.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use crate::config::{Config, ENABLE_PREFIX};
use crate::connector::{RetryPolicy, ServiceConnector};
use crate::coordinator::LoadCoordinator;
use crate::deferred::LoadGate;
use crate::entry::EntryItem;
use crate::error::{DataError, DataResult};
use crate::events::{EventBus, LoadEvent};
use crate::executor::{ExecutorHandle, SequentialExecutor};
use crate::history;
use crate::provider::apps;
use crate::provider::list::ListProvider;
use crate::provider::{LoadStep, ProviderCatalog, ProviderFactory, ProviderKind};
use crate::quick_list;
use crate::registry::{ProviderEntry, ProviderRegistry};
use crate::search::{SearchDispatcher, Searcher};
use crate::store::{DataStore, HistoryMode, JsonStore, ModFlags, ModRecord, ShortcutRecord};

/// In-process providers registered unconditionally, in order.
const INLINE_PROVIDERS: [ProviderKind; 5] = [
    ProviderKind::Filters,
    ProviderKind::Actions,
    ProviderKind::Tags,
    ProviderKind::Mods,
    ProviderKind::QuickList,
];

/// In-process providers that follow their `enable-<name>` flag.
const TOGGLEABLE_PROVIDERS: [ProviderKind; 2] = [ProviderKind::Search, ProviderKind::Calculator];

/// Returned by [`DataHandler::item_name`] for ids nothing can resolve.
pub const UNKNOWN_NAME: &str = "???";

pub struct DataHandlerBuilder {
    config: Config,
    store: Option<Arc<dyn DataStore>>,
    app_dirs: Option<Vec<PathBuf>>,
    factories: Vec<(ProviderKind, Option<ProviderFactory>)>,
}

impl DataHandlerBuilder {
    /// Use `store` instead of the JSON store at the configured path.
    pub fn store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Scan these directories for applications instead of the XDG defaults.
    pub fn app_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.app_dirs = Some(dirs);
        self
    }

    /// Replace the built-in factory for `kind`.
    pub fn factory(mut self, kind: ProviderKind, factory: ProviderFactory) -> Self {
        self.factories.push((kind, Some(factory)));
        self
    }

    /// Leave `kind` without a factory.
    pub fn without_factory(mut self, kind: ProviderKind) -> Self {
        self.factories.push((kind, None));
        self
    }

    /// Build the handler and start the first load. Must be called from
    /// inside a tokio runtime.
    pub fn build(self) -> DataResult<Arc<DataHandler>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DataError::NoRuntime(e.to_string()))?;

        let store = match self.store {
            Some(store) => store,
            None => match self.config.store_path() {
                Some(path) => Arc::new(JsonStore::open(path)) as Arc<dyn DataStore>,
                None => {
                    tracing::warn!("no data directory, history and mods will not persist");
                    Arc::new(JsonStore::in_memory())
                }
            },
        };

        let executor = SequentialExecutor::spawn(&runtime);
        let jobs = executor.handle();
        let events = EventBus::new();
        let registry = Arc::new(ProviderRegistry::new());
        let policy = RetryPolicy {
            max_retries: self.config.connector.max_retries,
            delay: self.config.connector.retry_delay(),
        };

        let catalog = ProviderCatalog::new(
            events.clone(),
            Arc::clone(&store),
            Arc::new(self.config.clone()),
            &registry,
        )
        .with_defaults(self.app_dirs);
        for (kind, factory) in self.factories {
            match factory {
                Some(factory) => catalog.set_factory(kind, factory),
                None => catalog.remove_factory(kind),
            }
        }
        let catalog = Arc::new(catalog);

        let config = Arc::new(RwLock::new(self.config));
        let coordinator = LoadCoordinator::new(
            Arc::clone(&registry),
            events.clone(),
            jobs.clone(),
            Arc::new(LoadGate::new()),
            Arc::clone(&config),
        );
        let connector = ServiceConnector::new(
            Arc::clone(&registry),
            catalog.clone(),
            Arc::clone(&coordinator),
            jobs.clone(),
            runtime,
            policy,
        );
        let dispatcher = Arc::new(SearchDispatcher::new(Arc::clone(&registry)));

        let handler = Arc::new_cyclic(|self_ref| DataHandler {
            config,
            store,
            events,
            registry,
            catalog,
            coordinator,
            connector,
            dispatcher,
            executor: Mutex::new(Some(executor)),
            jobs,
            self_ref: self_ref.clone(),
        });
        handler.start();
        Ok(handler)
    }
}

pub struct DataHandler {
    config: Arc<RwLock<Config>>,
    store: Arc<dyn DataStore>,
    events: EventBus,
    registry: Arc<ProviderRegistry>,
    catalog: Arc<ProviderCatalog>,
    coordinator: Arc<LoadCoordinator>,
    connector: Arc<ServiceConnector>,
    dispatcher: Arc<SearchDispatcher>,
    executor: Mutex<Option<SequentialExecutor>>,
    jobs: ExecutorHandle,
    self_ref: Weak<DataHandler>,
}

impl DataHandler {
    pub fn builder(config: Config) -> DataHandlerBuilder {
        DataHandlerBuilder {
            config,
            store: None,
            app_dirs: None,
            factories: Vec::new(),
        }
    }

    /// Build with the built-in providers and the configured store.
    pub fn new(config: Config) -> DataResult<Arc<Self>> {
        Self::builder(config).build()
    }

    fn start(&self) {
        // keep the app cache in step with every completed load
        let dispatcher = Arc::clone(&self.dispatcher);
        let registry = Arc::clone(&self.registry);
        self.events.subscribe(move |event| {
            if let LoadEvent::FullLoadOver { .. } = event {
                refresh_app_cache(&registry, &dispatcher);
            }
        });

        self.on_executor(|this| {
            this.coordinator.begin_load();
            let services = this.config.read().enabled_services();
            for kind in services {
                this.connector.connect(kind);
            }
            for kind in INLINE_PROVIDERS {
                this.register_inline(kind);
            }
            this.toggleable_providers();
            this.coordinator.on_provider_progressed();
        });
    }

    /// Run `job` on the bookkeeping executor with a strong handle to `self`.
    fn on_executor<F>(&self, job: F)
    where
        F: FnOnce(&DataHandler) + Send + 'static,
    {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        self.jobs.submit(move || job(&this));
    }

    fn register_inline(&self, kind: ProviderKind) {
        let name = kind.name();
        if self.registry.contains(name) {
            return;
        }
        match self.catalog.build(kind) {
            Some(Ok(provider)) => {
                self.registry.register(name, ProviderEntry::inline(provider));
            }
            Some(Err(e)) => tracing::warn!(provider = %name, error = %e, "failed to create provider"),
            None => tracing::warn!(provider = %name, "no factory for provider"),
        }
    }

    fn remove_inline(&self, name: &str) {
        if let Some(entry) = self.registry.remove(name) {
            if let Some(provider) = entry.provider {
                provider.shutdown();
            }
            tracing::info!(provider = %name, "provider removed");
        }
    }

    /// Bring the flag-controlled in-process providers in line with config.
    fn toggleable_providers(&self) {
        for kind in TOGGLEABLE_PROVIDERS {
            let enabled = self.config.read().is_enabled(kind.name());
            if enabled {
                self.register_inline(kind);
            } else {
                self.remove_inline(kind.name());
            }
        }
    }

    fn apply_toggle(&self, kind: ProviderKind, enabled: bool) {
        match (kind.is_service(), enabled) {
            (true, true) => self.connector.connect(kind),
            (true, false) => self.connector.disconnect(kind.name()),
            (false, true) => self.register_inline(kind),
            (false, false) => self.remove_inline(kind.name()),
        }
    }

    /// Force-reload one provider on the executor.
    fn reload_provider(&self, kind: ProviderKind) {
        let registry = Arc::clone(&self.registry);
        self.jobs.submit(move || {
            if let Some(provider) = registry.get(kind.name()) {
                provider.reload(true);
            }
        });
    }

    // Accessors

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.coordinator.generation()
    }

    pub fn connection_state(&self, name: &str) -> crate::connector::ConnectionState {
        self.connector.state(name)
    }

    /// Wait until every bookkeeping job queued so far has run.
    pub async fn flush(&self) -> DataResult<()> {
        self.jobs.flush().await
    }

    // Toggles

    /// A setting changed. Only `enable-<name>` keys for toggleable providers
    /// have an effect; exactly that provider is connected or disconnected.
    pub fn on_setting_changed(&self, key: &str, value: bool) -> bool {
        let Some(name) = self.config.write().set_flag(key, value) else {
            return false;
        };
        let Some(kind) = ProviderKind::from_name(&name).filter(|k| k.is_toggleable()) else {
            tracing::debug!(key, "not a provider toggle");
            return false;
        };
        tracing::info!(provider = %name, enabled = value, "provider toggled");
        self.on_executor(move |this| this.apply_toggle(kind, value));
        true
    }

    pub fn set_provider_enabled(&self, name: &str, enabled: bool) -> bool {
        self.on_setting_changed(&format!("{}{}", ENABLE_PREFIX, name), enabled)
    }

    pub fn is_provider_enabled(&self, name: &str) -> bool {
        self.config.read().is_enabled(name)
    }

    /// Retry any enabled service that is not connected with a full reload.
    pub fn check_services(&self) {
        let missing = self
            .config
            .read()
            .enabled_services()
            .into_iter()
            .find(|kind| !self.registry.contains(kind.name()));
        if let Some(kind) = missing {
            tracing::info!(provider = %kind, "service not connected, reloading providers");
            self.reload_providers();
        }
    }

    /// The device became interactive; retries waiting service starts.
    pub fn on_device_interactive(&self, locked: bool) {
        self.connector.on_device_interactive(locked);
    }

    // Load cycles

    /// Start a new load: re-apply toggles, connect enabled services and
    /// force-reload every provider, lowest step first.
    pub fn reload_providers(&self) {
        self.on_executor(|this| {
            this.coordinator.begin_load();
            this.toggleable_providers();
            let services = this.config.read().enabled_services();
            for kind in services {
                this.connector.connect(kind);
            }
            this.coordinator.reload_from(LoadStep::FIRST);
            this.coordinator.on_provider_progressed();
        });
    }

    /// Start a new load, force-reloading providers at `step` and above.
    pub fn reload_providers_from(&self, step: LoadStep) {
        self.on_executor(move |this| {
            this.coordinator.begin_load();
            this.coordinator.reload_from(step);
            this.coordinator.on_provider_progressed();
        });
    }

    /// A provider rebuilt its data. Everything at a later step depends on it
    /// and is marked dirty.
    pub fn on_provider_recreated(&self, name: &str) {
        let Some(step) = self
            .registry
            .get(name)
            .map(|p| p.load_step())
            .or_else(|| ProviderKind::from_name(name).map(ProviderKind::load_step))
        else {
            tracing::warn!(provider = %name, "recreated provider is unknown");
            return;
        };

        self.on_executor(move |this| {
            this.coordinator.begin_load();
            this.coordinator.mark_dirty_above(step);
            this.coordinator.on_provider_progressed();
        });
    }

    pub fn is_full_load_sent(&self) -> bool {
        self.coordinator.gate().is_full_load_sent()
    }

    /// Run `task` once the full data set is loaded, or now if it already is.
    pub fn run_after_load_over<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.coordinator.gate().run_after_load_over(task);
    }

    pub fn execute_after_load_over_tasks(&self) {
        self.check_services();
        self.coordinator.gate().execute_after_load_over_tasks();
    }

    /// Resolves once the load started by the latest queued job is over.
    ///
    /// Registration goes through the executor, so a reload requested just
    /// before this call is waited for rather than the generation it replaces.
    pub async fn wait_for_full_load(&self) -> DataResult<()> {
        let (tx, rx) = oneshot::channel();
        self.on_executor(move |this| {
            this.coordinator.gate().run_after_load_over(move || {
                let _ = tx.send(());
            });
        });
        rx.await.map_err(|_| DataError::ExecutorClosed)
    }

    // Search

    pub fn request_results(&self, query: &str, searcher: &Searcher) {
        self.dispatcher.request_results(query, searcher);
    }

    pub fn request_all_records(&self, searcher: &Searcher) {
        self.dispatcher.request_all_records(searcher);
    }

    /// Snapshot the app provider into the fallback cache used while it
    /// reloads. Returns whether a snapshot was taken.
    pub fn refresh_app_cache(&self) -> bool {
        refresh_app_cache(&self.registry, &self.dispatcher)
    }

    /// Install an app cache built elsewhere.
    pub fn set_app_cache(&self, entries: Vec<EntryItem>) {
        self.dispatcher.set_app_cache(Some(Arc::new(app_cache(entries))));
    }

    pub fn has_app_cache(&self) -> bool {
        self.dispatcher.has_app_cache()
    }

    // Entries and history

    pub fn entry(&self, id: &str) -> Option<EntryItem> {
        self.registry.find_by_id(id)
    }

    pub fn item_name(&self, id: &str) -> String {
        self.entry(id)
            .map(|entry| entry.name)
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }

    pub fn get_history(
        &self,
        item_count: usize,
        mode: HistoryMode,
        sort_alphabetically: bool,
        exclude: &HashSet<String>,
    ) -> Vec<EntryItem> {
        history::get_history(
            &self.registry,
            self.store.as_ref(),
            item_count,
            mode,
            sort_alphabetically,
            exclude,
        )
    }

    /// History using the configured count, mode, order and exclusions.
    pub fn history(&self) -> Vec<EntryItem> {
        let settings = self.config.read().history.clone();
        let exclude: HashSet<String> = settings.excluded.into_iter().collect();
        self.get_history(
            settings.item_count,
            settings.mode,
            settings.sort_alphabetically,
            &exclude,
        )
    }

    /// Record a launch of `id` along with the last query dispatched.
    pub fn add_to_history(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let query = self.dispatcher.last_query();
        self.store.insert_history(query.as_deref(), id)
    }

    pub fn clear_history(&self) -> bool {
        self.store.clear_history()
    }

    // Quick list and mods

    pub fn set_quick_list(&self, ids: &[String]) {
        quick_list::set_quick_list(self.store.as_ref(), ids);
        for kind in [ProviderKind::Mods, ProviderKind::Tags, ProviderKind::QuickList] {
            self.reload_provider(kind);
        }
    }

    pub fn mods(&self) -> Vec<ModRecord> {
        self.store.mods()
    }

    fn change_flags(&self, id: &str, flags: ModFlags, set: bool) -> bool {
        let existing = self.store.mod_record(id);
        let mut record = match (existing, set) {
            (Some(record), _) => record,
            (None, true) => ModRecord::new(id),
            (None, false) => return false,
        };
        if set {
            record.add_flags(flags);
        } else if record.flags.contains(flags) {
            record.clear_flags(flags);
        } else {
            return false;
        }

        let saved = if record.can_be_culled() {
            self.store.remove_mod(id)
        } else {
            self.store.set_mod(&record)
        };
        if saved {
            self.reload_provider(ProviderKind::Mods);
        }
        saved
    }

    /// Pin an entry.
    pub fn add_to_mods(&self, id: &str) -> bool {
        self.change_flags(id, ModFlags::PINNED, true)
    }

    pub fn remove_from_mods(&self, id: &str) -> bool {
        self.change_flags(id, ModFlags::PINNED, false)
    }

    pub fn add_to_hidden(&self, id: &str) -> bool {
        self.change_flags(id, ModFlags::HIDDEN, true)
    }

    pub fn remove_from_hidden(&self, id: &str) -> bool {
        self.change_flags(id, ModFlags::HIDDEN, false)
    }

    // Shortcuts

    pub fn shortcuts(&self) -> Vec<ShortcutRecord> {
        self.store.shortcuts()
    }

    pub fn add_shortcut(&self, record: &ShortcutRecord) -> bool {
        if !self.store.insert_shortcut(record) {
            return false;
        }
        self.reload_provider(ProviderKind::Shortcuts);
        true
    }

    /// Remove a shortcut together with its mod record.
    pub fn remove_shortcut(&self, id: &str) -> bool {
        self.store.remove_mod(id);
        let removed = self.store.remove_shortcut(id);
        if removed {
            self.reload_provider(ProviderKind::Shortcuts);
            self.reload_provider(ProviderKind::Mods);
        }
        removed
    }

    /// Remove every shortcut of `package`.
    pub fn remove_shortcuts(&self, package: &str) -> usize {
        let removed = self.store.remove_shortcuts(package);
        if removed > 0 {
            self.reload_provider(ProviderKind::Shortcuts);
        }
        removed
    }

    pub fn rename_shortcut(&self, id: &str, name: &str) -> bool {
        let renamed = self.store.rename_shortcut(id, name);
        if renamed {
            self.reload_provider(ProviderKind::Shortcuts);
        }
        renamed
    }

    // Custom names and icons

    pub fn rename_entry(&self, id: &str, name: &str) -> bool {
        let renamed = self.store.set_custom_name(id, name);
        if renamed {
            self.reload_provider(ProviderKind::Mods);
        }
        renamed
    }

    pub fn remove_custom_name(&self, id: &str) -> bool {
        let removed = self.store.remove_custom_name(id);
        if removed {
            self.reload_provider(ProviderKind::Mods);
        }
        removed
    }

    pub fn custom_name(&self, id: &str) -> Option<String> {
        self.store.custom_name(id)
    }

    pub fn set_custom_icon(&self, id: &str, icon: &[u8]) -> bool {
        let set = self.store.set_custom_icon(id, icon);
        if set {
            self.reload_provider(ProviderKind::Mods);
        }
        set
    }

    pub fn remove_custom_icon(&self, id: &str) -> bool {
        let removed = self.store.remove_custom_icon(id);
        if removed {
            self.reload_provider(ProviderKind::Mods);
        }
        removed
    }

    pub fn custom_icon(&self, id: &str) -> Option<Vec<u8>> {
        self.store.custom_icon(id)
    }

    /// Cache a rendered app icon. Failure is logged, never raised.
    pub fn set_cached_app_icon(&self, id: &str, icon: &[u8]) -> bool {
        let cached = self.store.set_cached_icon(id, icon);
        if !cached {
            tracing::warn!(id, "failed to cache app icon");
        }
        cached
    }

    pub fn cached_app_icon(&self, id: &str) -> Option<Vec<u8>> {
        self.store.cached_icon(id)
    }

    // Tags

    pub fn set_tags(&self, id: &str, tags: &[String]) -> bool {
        let set = self.store.set_tags(id, tags);
        if set {
            self.reload_provider(ProviderKind::Tags);
        }
        set
    }

    pub fn tags(&self, id: &str) -> Vec<String> {
        self.store.tags(id)
    }

    // Teardown

    /// Disconnect the services, stop the executor and flush the store.
    pub async fn shutdown(&self) -> DataResult<()> {
        self.on_executor(|this| {
            for kind in ProviderKind::SERVICES {
                this.connector.disconnect(kind.name());
            }
        });

        let executor = self.executor.lock().take();
        if let Some(mut executor) = executor {
            executor.shutdown().await?;
        }

        if !self.store.flush() {
            return Err(DataError::Store("failed to flush store".to_string()));
        }
        tracing::info!("data handler shut down");
        Ok(())
    }
}

fn app_cache(entries: Vec<EntryItem>) -> ListProvider {
    ListProvider::snapshot("app-cache", LoadStep::FIRST, &[apps::SCHEME], entries)
}

fn refresh_app_cache(registry: &ProviderRegistry, dispatcher: &SearchDispatcher) -> bool {
    let entries = registry
        .get(ProviderKind::App.name())
        .filter(|provider| provider.is_loaded())
        .and_then(|provider| provider.entries());
    match entries {
        Some(entries) => {
            tracing::debug!(count = entries.len(), "app cache refreshed");
            dispatcher.set_app_cache(Some(Arc::new(app_cache(entries))));
            true
        }
        None => false,
    }
}
