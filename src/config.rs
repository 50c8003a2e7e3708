use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DataError, DataResult};
use crate::provider::ProviderKind;
use crate::store::HistoryMode;

/// Prefix of the per-provider enable flags.
pub const ENABLE_PREFIX: &str = "enable-";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Override for the store file location. `~` is expanded.
    #[serde(default)]
    pub store_path: Option<String>,
    /// `enable-<name>` flags. A missing flag falls back to the kind's
    /// default.
    pub providers: BTreeMap<String, bool>,
    pub history: HistoryConfig,
    pub connector: ConnectorConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub search_engines: Vec<SearchEngineConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub mode: HistoryMode,
    pub item_count: usize,
    pub sort_alphabetically: bool,
    /// Ids never shown in history.
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchEngineConfig {
    pub name: String,
    /// URL with a `{query}` or `%s` placeholder.
    pub url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: None,
            providers: BTreeMap::new(),
            history: HistoryConfig::default(),
            connector: ConnectorConfig::default(),
            search: SearchConfig::default(),
            search_engines: vec![
                SearchEngineConfig {
                    name: "DuckDuckGo".to_string(),
                    url: "https://duckduckgo.com/?q={query}".to_string(),
                },
                SearchEngineConfig {
                    name: "Wikipedia".to_string(),
                    url: "https://en.wikipedia.org/w/index.php?search={query}".to_string(),
                },
            ],
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            mode: HistoryMode::Recency,
            item_count: 10,
            sort_alphabetically: false,
            excluded: Vec::new(),
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            max_retries: 20,
            retry_delay_ms: 10,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { max_results: 50 }
    }
}

impl ConnectorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
            })
            .join("nova")
            .join("data.toml")
    }

    /// Load config from the default location, or defaults if not found
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`. Unreadable or invalid files fall back to
    /// defaults.
    pub fn load_from(path: &Path) -> Self {
        let mut config = if path.exists() {
            match Self::read(path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.validate();
        config
    }

    fn read(path: &Path) -> DataResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Clamp values to acceptable ranges
    fn validate(&mut self) {
        self.history.item_count = self.history.item_count.clamp(1, 100);
        self.search.max_results = self.search.max_results.clamp(1, 500);
        self.connector.max_retries = self.connector.max_retries.min(100);
        self.connector.retry_delay_ms = self.connector.retry_delay_ms.min(60_000);

        // Drop malformed flags
        self.providers
            .retain(|key, _| key.starts_with(ENABLE_PREFIX) && key.len() > ENABLE_PREFIX.len());
    }

    /// Save config to the default location
    pub fn save(&self) -> DataResult<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> DataResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Whether `enable-<name>` is on. A missing flag takes the kind's
    /// default; names that are not provider kinds count as on.
    pub fn is_enabled(&self, name: &str) -> bool {
        match self.providers.get(&format!("{}{}", ENABLE_PREFIX, name)) {
            Some(enabled) => *enabled,
            None => ProviderKind::from_name(name).map_or(true, ProviderKind::enabled_by_default),
        }
    }

    /// Set an `enable-<name>` flag. Returns the provider name if `key` was a
    /// provider flag, `None` (and no change) otherwise.
    pub fn set_flag(&mut self, key: &str, value: bool) -> Option<String> {
        let name = key.strip_prefix(ENABLE_PREFIX).filter(|n| !n.is_empty())?;
        self.providers.insert(key.to_string(), value);
        Some(name.to_string())
    }

    /// Resolved store location: the configured override, else the default.
    pub fn store_path(&self) -> Option<PathBuf> {
        match &self.store_path {
            Some(path) => Some(PathBuf::from(shellexpand::tilde(path).into_owned())),
            None => crate::store::JsonStore::default_path(),
        }
    }

    /// Service kinds whose flag is on.
    pub fn enabled_services(&self) -> Vec<ProviderKind> {
        ProviderKind::SERVICES
            .into_iter()
            .filter(|kind| self.is_enabled(kind.name()))
            .collect()
    }
}

impl std::str::FromStr for Config {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::from_str(s)?;
        config.validate();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.is_enabled("app"));
        assert!(!config.is_enabled("contacts"));
        assert!(config.is_enabled("calculator"));
        assert_eq!(config.connector.max_retries, 20);
        assert_eq!(config.connector.retry_delay(), Duration::from_millis(10));
        assert_eq!(
            config.enabled_services(),
            vec![ProviderKind::App, ProviderKind::Shortcuts]
        );
    }

    #[test]
    fn test_parse_partial_file() {
        let config: Config = r#"
            store_path = "~/nova-data.json"

            [providers]
            enable-calculator = false
            bogus = true

            [history]
            mode = "frecency"
            item_count = 500
        "#
        .parse()
        .unwrap();

        assert!(!config.is_enabled("calculator"));
        assert!(!config.is_enabled("contacts"));
        assert!(!config.providers.contains_key("bogus"));
        assert_eq!(config.history.mode, HistoryMode::Frecency);
        assert_eq!(config.history.item_count, 100);
        assert_eq!(config.search.max_results, 50);
        assert!(!config
            .store_path()
            .unwrap()
            .to_string_lossy()
            .starts_with('~'));
    }

    #[test]
    fn test_providers_table_keeps_kind_defaults() {
        let config: Config = "[providers]\nenable-calculator = false".parse().unwrap();
        assert!(!config.is_enabled("calculator"));
        assert!(!config.is_enabled("contacts"));
        assert_eq!(
            config.enabled_services(),
            vec![ProviderKind::App, ProviderKind::Shortcuts]
        );

        let config: Config = "[providers]\nenable-contacts = true".parse().unwrap();
        assert!(config.is_enabled("contacts"));
        assert_eq!(config.enabled_services().len(), 3);
    }

    #[test]
    fn test_set_flag_ignores_other_keys() {
        let mut config = Config::default();
        assert_eq!(config.set_flag("enable-search", false).as_deref(), Some("search"));
        assert!(!config.is_enabled("search"));

        assert_eq!(config.set_flag("theme", false), None);
        assert_eq!(config.set_flag("enable-", false), None);
        assert!(!config.providers.contains_key("theme"));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nova").join("data.toml");

        let mut config = Config::default();
        config.set_flag("enable-app", false);
        config.history.sort_alphabetically = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path);
        assert!(!loaded.is_enabled("app"));
        assert!(loaded.history.sort_alphabetically);
    }

    #[test]
    fn test_invalid_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.toml");
        fs::write(&path, "providers = 3").unwrap();

        let config = Config::load_from(&path);
        assert!(!config.is_enabled("contacts"));
    }
}
