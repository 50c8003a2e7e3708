//! Nova data layer - provider orchestration for the launcher.
//!
//! Many independent providers (apps, shortcuts, tags, mods, search engines,
//! the calculator, ...) each load their entries on their own schedule. This
//! crate connects them, tracks their staged loading, and answers search and
//! history queries across all of them.
//!
//! # Architecture
//!
//! - [`registry`] - Name-keyed provider slots in registration order
//! - [`connector`] - Starting provider services with bounded retry
//! - [`coordinator`] - Staged load detection and the full-load signal
//! - [`deferred`] - Work queued until the full load is over
//! - [`search`] - Cancellable search fan-out with an app-cache fallback
//! - [`history`] - Ranked history resolved into live entries
//! - [`quick_list`] - Ordered quick-list positions
//! - [`store`] - Persisted history, mods, shortcuts and tags
//! - [`handler`] - The facade tying it all together
//!
//! All bookkeeping runs on one sequential [`executor`], so registry mutation
//! and load-progress evaluation never race each other.
//!
//! # Example
//!
//! ```ignore
//! use nova_data::{Config, DataHandler, Searcher};
//!
//! let handler = DataHandler::new(Config::load())?;
//! handler.wait_for_full_load().await;
//!
//! let searcher = Searcher::new(20);
//! handler.request_results("fire", &searcher);
//! for entry in searcher.ranked_results() {
//!     println!("{} {}", entry.id, entry.name);
//! }
//! ```

pub mod cli;
pub mod config;
pub mod connector;
pub mod coordinator;
pub mod deferred;
pub mod entry;
pub mod events;
pub mod executor;
pub mod handler;
pub mod history;
pub mod logging;
pub mod provider;
pub mod quick_list;
pub mod registry;
pub mod search;
pub mod store;

// Internal modules
mod error;

// Re-export commonly used types for convenience
pub use config::Config;
pub use entry::EntryItem;
pub use error::{DataError, DataResult};
pub use events::{EventBus, LoadEvent};
pub use handler::{DataHandler, DataHandlerBuilder};
pub use provider::{LoadStep, Provider, ProviderKind};
pub use quick_list::Position;
pub use search::Searcher;
pub use store::{DataStore, HistoryMode, JsonStore};
