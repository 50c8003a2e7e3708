//! Provider contract and the closed set of provider kinds.
//!
//! A provider is an independently loading data source. The orchestration
//! layer only ever talks to it through [`Provider`]; how it computes its
//! entries is its own business.

pub mod apps;
pub mod calculator;
pub mod catalog;
pub mod list;
pub mod search_engine;

use std::fmt;
use std::sync::{Arc, Weak};

use thiserror::Error;

use crate::entry::EntryItem;
use crate::config::Config;
use crate::events::EventBus;
use crate::registry::ProviderRegistry;
use crate::search::Searcher;
use crate::store::DataStore;

pub use catalog::{ProviderCatalog, ProviderFactory};

/// Ordinal loading stage. Lower steps must fully load before higher steps
/// are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LoadStep(pub u8);

impl LoadStep {
    /// Sources with no dependencies (apps, static lists, calculator).
    pub const FIRST: LoadStep = LoadStep(0);
    /// Sources that decorate first-step entries (contacts, shortcuts).
    pub const SECOND: LoadStep = LoadStep(1);
    /// Sources that resolve ids from earlier steps (tags, mods, quick list).
    pub const THIRD: LoadStep = LoadStep(2);
}

impl fmt::Display for LoadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}", self.0)
    }
}

/// Capability contract implemented by every data source.
///
/// Implementations use interior mutability: the orchestrator holds them as
/// `Arc<dyn Provider>` and calls them from the bookkeeping executor and from
/// search threads concurrently.
pub trait Provider: Send + Sync {
    /// Whether the provider has finished loading its current data set.
    fn is_loaded(&self) -> bool;

    fn load_step(&self) -> LoadStep;

    /// Ask the provider to (re)load. A non-forced reload is a nudge and may
    /// be ignored if the data is already current.
    fn reload(&self, force: bool);

    /// Mark the data stale so the next reload refreshes it.
    fn set_dirty(&self);

    /// Push matches for `query` into the searcher's sink.
    fn request_results(&self, query: &str, searcher: &Searcher);

    /// Full current entry list, or `None` if not ready.
    fn entries(&self) -> Option<Vec<EntryItem>>;

    /// Cheap existence hint for [`Provider::find_by_id`].
    fn may_find_by_id(&self, id: &str) -> bool;

    fn find_by_id(&self, id: &str) -> Option<EntryItem>;

    /// Release any resources. Called after the connection has been released.
    fn shutdown(&self) {}
}

/// The closed set of provider kinds, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    App,
    Contacts,
    Shortcuts,
    Filters,
    Actions,
    Tags,
    Mods,
    QuickList,
    Search,
    Calculator,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 10] = [
        ProviderKind::App,
        ProviderKind::Contacts,
        ProviderKind::Shortcuts,
        ProviderKind::Filters,
        ProviderKind::Actions,
        ProviderKind::Tags,
        ProviderKind::Mods,
        ProviderKind::QuickList,
        ProviderKind::Search,
        ProviderKind::Calculator,
    ];

    /// Kinds backed by a connected service, started through the connector.
    pub const SERVICES: [ProviderKind; 3] = [
        ProviderKind::App,
        ProviderKind::Contacts,
        ProviderKind::Shortcuts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::App => "app",
            ProviderKind::Contacts => "contacts",
            ProviderKind::Shortcuts => "shortcuts",
            ProviderKind::Filters => "filters",
            ProviderKind::Actions => "actions",
            ProviderKind::Tags => "tags",
            ProviderKind::Mods => "mods",
            ProviderKind::QuickList => "quickList",
            ProviderKind::Search => "search",
            ProviderKind::Calculator => "calculator",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Connected through the service connector, with retry on restricted start.
    pub fn is_service(self) -> bool {
        Self::SERVICES.contains(&self)
    }

    /// State of the `enable-<name>` flag when the config does not set it.
    /// No contacts backend ships, so contacts starts switched off.
    pub fn enabled_by_default(self) -> bool {
        !matches!(self, ProviderKind::Contacts)
    }

    /// Can be switched on and off with an `enable-<name>` flag.
    pub fn is_toggleable(self) -> bool {
        self.is_service() || matches!(self, ProviderKind::Search | ProviderKind::Calculator)
    }

    pub fn load_step(self) -> LoadStep {
        match self {
            ProviderKind::App
            | ProviderKind::Filters
            | ProviderKind::Actions
            | ProviderKind::Search
            | ProviderKind::Calculator => LoadStep::FIRST,
            ProviderKind::Contacts | ProviderKind::Shortcuts => LoadStep::SECOND,
            ProviderKind::Tags | ProviderKind::Mods | ProviderKind::QuickList => LoadStep::THIRD,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a provider could not be started.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StartError {
    /// The process is not currently allowed to start background work.
    /// Recoverable once the device becomes interactive again.
    #[error("background start is restricted")]
    BackgroundRestricted,

    #[error("provider failed to start: {0}")]
    Failed(String),
}

/// What a factory gets to build its provider.
#[derive(Clone)]
pub struct ProviderContext {
    pub kind: ProviderKind,
    pub events: EventBus,
    pub store: Arc<dyn DataStore>,
    pub config: Arc<Config>,
    /// Weak so providers that resolve ids do not keep the registry alive.
    pub registry: Weak<ProviderRegistry>,
}

impl ProviderContext {
    /// Resolve an id through the registry, first match wins.
    pub fn resolve(&self, id: &str) -> Option<EntryItem> {
        self.registry.upgrade()?.find_by_id(id)
    }
}
