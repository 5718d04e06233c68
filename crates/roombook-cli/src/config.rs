//! CLI configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/roombook/config.toml` by default.
//!
//! The API token supports secret references:
//! - `pass::path/in/store` resolved via `pass show`
//! - `env::VAR_NAME` resolved from the environment
//! - plain text used as-is

use std::path::{Path, PathBuf};
use std::time::Duration;

use roombook_engine::{CacheConfig, EngineConfig, MonitorConfig, ReminderConfig};
use roombook_providers::HttpConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Configuration for the roombook CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoombookConfig {
    pub api: ApiSettings,
    pub cache: CacheSettings,
    pub monitor: MonitorSettings,
    pub reminders: ReminderSettings,
    pub store: StoreSettings,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Base URL of the booking API.
    pub base_url: Option<String>,
    /// Bearer token (supports `pass::` and `env::` prefixes).
    pub token: Option<String>,
    /// Default user id when `--user` is not given.
    pub user_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            user_id: None,
            timeout_secs: HttpConfig::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Local cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_notifications: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            ttl_secs: defaults.ttl.as_secs(),
            max_notifications: defaults.max_notifications,
        }
    }
}

/// Reservation monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let defaults = MonitorConfig::default();
        Self {
            poll_interval_secs: defaults.poll_interval.as_secs(),
            max_backoff_secs: defaults.max_backoff.as_secs(),
        }
    }
}

/// Reminder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderSettings {
    /// Lead time used when the stored preferences have none.
    pub default_lead_minutes: u32,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            default_lead_minutes: ReminderConfig::default().default_lead_minutes,
        }
    }
}

/// Local store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Path of the store file; defaults to the data directory.
    pub path: Option<PathBuf>,
}

impl RoombookConfig {
    /// Loads configuration from the default path, or defaults if absent.
    pub fn load() -> CliResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| CliError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("roombook")
    }

    /// Returns the default data directory path.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("roombook")
    }

    /// Path of the local store file.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("store.json"))
    }

    /// The user to act as: `--user` first, then `api.user_id`.
    pub fn user_id(&self, flag: Option<&str>) -> CliResult<String> {
        flag.map(str::to_string)
            .or_else(|| self.api.user_id.clone())
            .ok_or_else(|| CliError::Config("no user given; pass --user or set api.user_id".into()))
    }

    /// Builds the engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_cache(
                CacheConfig::default()
                    .with_ttl(Duration::from_secs(self.cache.ttl_secs))
                    .with_max_notifications(self.cache.max_notifications),
            )
            .with_monitor(
                MonitorConfig::new(Duration::from_secs(self.monitor.poll_interval_secs))
                    .with_max_backoff(Duration::from_secs(self.monitor.max_backoff_secs)),
            )
            .with_reminders(
                ReminderConfig::default()
                    .with_default_lead_minutes(self.reminders.default_lead_minutes),
            )
    }

    /// Builds the HTTP client configuration, resolving the token.
    pub fn http_config(&self) -> CliResult<HttpConfig> {
        let base_url = self.api.base_url.as_deref().ok_or_else(|| {
            CliError::Config(format!(
                "api.base_url is not set in {}",
                Self::default_path().display()
            ))
        })?;
        let mut config = HttpConfig::new(base_url)
            .map_err(|e| CliError::Config(format!("invalid api.base_url `{}`: {}", base_url, e)))?
            .with_timeout(Duration::from_secs(self.api.timeout_secs));
        if let Some(raw) = &self.api.token {
            config = config.with_token(crate::secret::resolve(raw)?);
        }
        Ok(config)
    }

    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> CliResult<()> {
        if self.monitor.poll_interval_secs == 0 {
            return Err(CliError::Config("monitor.poll_interval_secs must be positive".into()));
        }
        if self.reminders.default_lead_minutes == 0 {
            return Err(CliError::Config(
                "reminders.default_lead_minutes must be positive".into(),
            ));
        }
        if self.cache.max_notifications == 0 {
            return Err(CliError::Config("cache.max_notifications must be positive".into()));
        }
        if self.api.base_url.is_some() {
            self.http_config()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: RoombookConfig = toml::from_str("").unwrap();
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.cache.max_notifications, 50);
        assert_eq!(config.monitor.poll_interval_secs, 300);
        assert_eq!(config.reminders.default_lead_minutes, 15);
        assert_eq!(config.api.timeout_secs, 15);
    }

    #[test]
    fn sections_map_to_engine_config() {
        let config: RoombookConfig = toml::from_str(
            r#"
[api]
base_url = "https://rooms.example.com/api/"
user_id = "alice"

[cache]
ttl_secs = 60
max_notifications = 20

[monitor]
poll_interval_secs = 120

[reminders]
default_lead_minutes = 10
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.user_id(None).unwrap(), "alice");
        assert_eq!(config.user_id(Some("bob")).unwrap(), "bob");

        let engine = config.engine_config();
        assert_eq!(engine.cache.ttl, Duration::from_secs(60));
        assert_eq!(engine.cache.max_notifications, 20);
        assert_eq!(engine.monitor.poll_interval, Duration::from_secs(120));
        assert_eq!(engine.reminders.default_lead_minutes, 10);
    }

    #[test]
    fn token_env_reference_is_resolved() {
        unsafe {
            std::env::set_var("_ROOMBOOK_CONFIG_TOKEN", "t0ken");
        }
        let config: RoombookConfig = toml::from_str(
            "[api]\nbase_url = \"https://rooms.example.com\"\ntoken = \"env::_ROOMBOOK_CONFIG_TOKEN\"\n",
        )
        .unwrap();
        let http = config.http_config().unwrap();
        assert_eq!(http.token.as_deref(), Some("t0ken"));
        unsafe {
            std::env::remove_var("_ROOMBOOK_CONFIG_TOKEN");
        }
    }

    #[test]
    fn missing_base_url_errors() {
        let config = RoombookConfig::default();
        assert!(config.http_config().is_err());
        assert!(config.user_id(None).is_err());
    }

    #[test]
    fn zero_default_lead_is_invalid() {
        let config: RoombookConfig =
            toml::from_str("[reminders]\ndefault_lead_minutes = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(CliError::Config(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store]\npath = \"/tmp/roombook-store.json\"\n").unwrap();
        let config = RoombookConfig::load_from(&path).unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/tmp/roombook-store.json"));

        std::fs::write(&path, "[cache\n").unwrap();
        assert!(RoombookConfig::load_from(&path).is_err());
    }
}
