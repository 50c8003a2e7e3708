//! Named factory table.
//!
//! Every provider kind is built by table lookup. A kind with no factory
//! cannot be started; the connector logs that and leaves it absent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::apps::{self, default_application_dirs};
use super::calculator::CalculatorProvider;
use super::list::ListProvider;
use super::search_engine::SearchEngineProvider;
use super::{Provider, ProviderContext, ProviderKind, StartError};
use crate::config::Config;
use crate::entry::EntryItem;
use crate::events::EventBus;
use crate::registry::ProviderRegistry;
use crate::store::{DataStore, ModFlags, ModRecord};

/// Builds a provider, or reports why it could not be started.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderContext) -> Result<Arc<dyn Provider>, StartError> + Send + Sync + 'static>;

pub struct ProviderCatalog {
    factories: RwLock<HashMap<ProviderKind, ProviderFactory>>,
    events: EventBus,
    store: Arc<dyn DataStore>,
    config: Arc<Config>,
    registry: Weak<ProviderRegistry>,
}

impl ProviderCatalog {
    /// An empty catalog sharing the given collaborators with every provider
    /// it builds.
    pub fn new(
        events: EventBus,
        store: Arc<dyn DataStore>,
        config: Arc<Config>,
        registry: &Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            events,
            store,
            config,
            registry: Arc::downgrade(registry),
        }
    }

    /// Install the built-in factories. Applications are scanned from
    /// `app_dirs`, or the XDG defaults when `None`.
    pub fn with_defaults(self, app_dirs: Option<Vec<PathBuf>>) -> Self {
        let app_dirs = app_dirs.unwrap_or_else(default_application_dirs);
        self.set_factory(
            ProviderKind::App,
            Arc::new(move |ctx: &ProviderContext| {
                Ok(Arc::new(apps::app_provider(ctx, app_dirs.clone())) as Arc<dyn Provider>)
            }),
        );
        self.set_factory(ProviderKind::Shortcuts, Arc::new(shortcuts_provider));
        self.set_factory(ProviderKind::Filters, Arc::new(filters_provider));
        self.set_factory(ProviderKind::Actions, Arc::new(actions_provider));
        self.set_factory(ProviderKind::Tags, Arc::new(tags_provider));
        self.set_factory(ProviderKind::Mods, Arc::new(mods_provider));
        self.set_factory(ProviderKind::QuickList, Arc::new(quick_list_provider));
        self.set_factory(
            ProviderKind::Search,
            Arc::new(|ctx: &ProviderContext| {
                Ok(Arc::new(SearchEngineProvider::new(ctx.config.search_engines.clone()))
                    as Arc<dyn Provider>)
            }),
        );
        self.set_factory(
            ProviderKind::Calculator,
            Arc::new(|_: &ProviderContext| Ok(Arc::new(CalculatorProvider::new()) as Arc<dyn Provider>)),
        );
        self
    }

    /// Register or replace the factory for `kind`.
    pub fn set_factory(&self, kind: ProviderKind, factory: ProviderFactory) {
        self.factories.write().insert(kind, factory);
    }

    pub fn remove_factory(&self, kind: ProviderKind) {
        self.factories.write().remove(&kind);
    }

    pub fn has_factory(&self, kind: ProviderKind) -> bool {
        self.factories.read().contains_key(&kind)
    }

    pub fn context(&self, kind: ProviderKind) -> ProviderContext {
        ProviderContext {
            kind,
            events: self.events.clone(),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            registry: self.registry.clone(),
        }
    }

    /// Build a provider for `kind`. `None` if no factory is registered.
    pub fn build(&self, kind: ProviderKind) -> Option<Result<Arc<dyn Provider>, StartError>> {
        let factory = self.factories.read().get(&kind).cloned()?;
        Some(factory(&self.context(kind)))
    }
}

fn list_provider(
    ctx: &ProviderContext,
    schemes: &[&str],
    loader: super::list::Loader,
) -> Result<Arc<dyn Provider>, StartError> {
    Ok(Arc::new(ListProvider::new(
        ctx.kind.name(),
        ctx.kind.load_step(),
        schemes,
        loader,
        Some(ctx.events.clone()),
    )))
}

fn shortcuts_provider(ctx: &ProviderContext) -> Result<Arc<dyn Provider>, StartError> {
    let store = Arc::clone(&ctx.store);
    list_provider(
        ctx,
        &["shortcut"],
        Arc::new(move || {
            store
                .shortcuts()
                .into_iter()
                .map(|s| EntryItem::new(s.id, s.display_name).with_description(s.target))
                .collect()
        }),
    )
}

fn filters_provider(ctx: &ProviderContext) -> Result<Arc<dyn Provider>, StartError> {
    list_provider(
        ctx,
        &["filter"],
        Arc::new(|| {
            [
                ("apps", "Applications"),
                ("contacts", "Contacts"),
                ("shortcuts", "Shortcuts"),
                ("favorites", "Favorites"),
                ("history", "History"),
            ]
            .into_iter()
            .map(|(id, name)| EntryItem::new(format!("filter://{}", id), name))
            .collect()
        }),
    )
}

fn actions_provider(ctx: &ProviderContext) -> Result<Arc<dyn Provider>, StartError> {
    list_provider(
        ctx,
        &["action"],
        Arc::new(|| {
            vec![
                EntryItem::new("action://reload", "Reload providers"),
                EntryItem::new("action://show-history", "Show history"),
                EntryItem::new("action://clear-history", "Clear history"),
                EntryItem::new("action://edit-quick-list", "Edit quick list"),
            ]
        }),
    )
}

fn tags_provider(ctx: &ProviderContext) -> Result<Arc<dyn Provider>, StartError> {
    let store = Arc::clone(&ctx.store);
    list_provider(
        ctx,
        &["tag"],
        Arc::new(move || {
            store
                .all_tags()
                .into_iter()
                .map(|tag| EntryItem::new(format!("tag://{}", tag), tag))
                .collect()
        }),
    )
}

/// Resolve a mod record into a display entry, applying its custom name.
fn decorate(ctx: &ProviderContext, record: &ModRecord) -> Option<EntryItem> {
    let mut entry = ctx.resolve(&record.record)?;
    if record.flags.contains(ModFlags::CUSTOM_NAME) {
        if let Some(name) = &record.name {
            entry.name = name.clone();
        }
    }
    Some(entry)
}

fn mods_provider(ctx: &ProviderContext) -> Result<Arc<dyn Provider>, StartError> {
    let resolver = ctx.clone();
    // Resolves ids owned by other providers, so it claims no scheme itself
    list_provider(
        ctx,
        &[],
        Arc::new(move || {
            resolver
                .store
                .mods()
                .iter()
                .filter(|r| r.flags.contains(ModFlags::PINNED) && !r.flags.contains(ModFlags::HIDDEN))
                .filter_map(|r| decorate(&resolver, r))
                .collect()
        }),
    )
}

fn quick_list_provider(ctx: &ProviderContext) -> Result<Arc<dyn Provider>, StartError> {
    let resolver = ctx.clone();
    list_provider(
        ctx,
        &[],
        Arc::new(move || {
            let mut records: Vec<ModRecord> = resolver
                .store
                .mods()
                .into_iter()
                .filter(|r| r.is_in_quick_list())
                .collect();
            records.sort_by_key(|r| r.position);
            records
                .iter()
                .filter_map(|r| decorate(&resolver, r))
                .collect()
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quick_list::set_quick_list;
    use crate::registry::ProviderEntry;
    use crate::store::{JsonStore, ShortcutRecord};

    fn catalog(registry: &Arc<ProviderRegistry>, store: Arc<dyn DataStore>) -> ProviderCatalog {
        ProviderCatalog::new(EventBus::new(), store, Arc::new(Config::default()), registry)
            .with_defaults(Some(Vec::new()))
    }

    fn build(catalog: &ProviderCatalog, kind: ProviderKind) -> Arc<dyn Provider> {
        let provider = catalog.build(kind).unwrap().unwrap();
        provider.reload(true);
        provider
    }

    #[test]
    fn test_every_kind_but_contacts_has_a_factory() {
        let registry = Arc::new(ProviderRegistry::new());
        let catalog = catalog(&registry, Arc::new(JsonStore::in_memory()));
        for kind in ProviderKind::ALL {
            assert_eq!(catalog.has_factory(kind), kind != ProviderKind::Contacts, "{}", kind);
        }
        assert!(catalog.build(ProviderKind::Contacts).is_none());
    }

    #[test]
    fn test_built_providers_use_kind_step() {
        let registry = Arc::new(ProviderRegistry::new());
        let catalog = catalog(&registry, Arc::new(JsonStore::in_memory()));
        for kind in ProviderKind::ALL {
            if let Some(Ok(provider)) = catalog.build(kind) {
                assert_eq!(provider.load_step(), kind.load_step(), "{}", kind);
            }
        }
    }

    #[test]
    fn test_quick_list_resolves_in_position_order() {
        let registry = Arc::new(ProviderRegistry::new());
        let store = Arc::new(JsonStore::in_memory());
        let catalog = catalog(&registry, store.clone());

        let actions = build(&catalog, ProviderKind::Actions);
        registry.register("actions", ProviderEntry::inline(actions));

        set_quick_list(
            store.as_ref(),
            &[
                "action://clear-history".to_string(),
                "action://missing".to_string(),
                "action://reload".to_string(),
            ],
        );

        let quick_list = build(&catalog, ProviderKind::QuickList);
        let names: Vec<String> = quick_list
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Clear history", "Reload providers"]);
        assert!(!quick_list.may_find_by_id("action://reload"));
    }

    #[test]
    fn test_mods_apply_custom_names() {
        let registry = Arc::new(ProviderRegistry::new());
        let store = Arc::new(JsonStore::in_memory());
        let catalog = catalog(&registry, store.clone());
        registry.register(
            "actions",
            ProviderEntry::inline(build(&catalog, ProviderKind::Actions)),
        );

        let mut pinned = ModRecord::new("action://reload");
        pinned.add_flags(ModFlags::PINNED);
        store.set_mod(&pinned);
        store.set_custom_name("action://reload", "Refresh");

        let mods = build(&catalog, ProviderKind::Mods);
        let entries = mods.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Refresh");
    }

    #[test]
    fn test_shortcuts_and_tags_read_the_store() {
        let registry = Arc::new(ProviderRegistry::new());
        let store = Arc::new(JsonStore::in_memory());
        store.insert_shortcut(&ShortcutRecord::new("org.mozilla", "Private window", "firefox --private-window"));
        store.set_tags("app://firefox", &["web".to_string()]);
        let catalog = catalog(&registry, store.clone());

        let shortcuts = build(&catalog, ProviderKind::Shortcuts);
        let entry = shortcuts.find_by_id("shortcut://org.mozilla/Private window").unwrap();
        assert_eq!(entry.description.as_deref(), Some("firefox --private-window"));

        let tags = build(&catalog, ProviderKind::Tags);
        assert_eq!(tags.find_by_id("tag://web").unwrap().name, "web");
    }
}
