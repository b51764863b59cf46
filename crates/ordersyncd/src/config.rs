//! Daemon configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use sync_core::{HttpSourceConfig, SqliteStoreConfig, SyncConfig};

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "ORDERSYNC_CONFIG";

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Address the control API binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Instance name attached to structured logs
    #[serde(default = "default_instance")]
    pub instance: String,

    #[serde(default)]
    pub source: SourceSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncConfig,
}

/// Remote order API
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub base_url: String,
    pub path: String,
    pub bearer_token: Option<String>,
    pub envelope_field: String,
    pub connect_timeout_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        let defaults = HttpSourceConfig::default();
        Self {
            base_url: defaults.base_url,
            path: defaults.path,
            bearer_token: None,
            envelope_field: defaults.envelope_field,
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
        }
    }
}

/// Local SQLite store
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub table: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        let defaults = SqliteStoreConfig::default();
        Self {
            url: defaults.database_url,
            table: defaults.table,
            max_connections: defaults.max_connections,
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_instance() -> String {
    "ordersyncd".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            instance: default_instance(),
            source: SourceSettings::default(),
            database: DatabaseSettings::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the optional config file, then the environment.
    ///
    /// Environment keys use the `ORDERSYNC_` prefix and `__` between levels,
    /// e.g. `ORDERSYNC_SYNC__PAGE_SIZE=200`.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("ORDERSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("sync.date_fields"),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: DaemonConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.sync.validate().context("Invalid sync configuration")?;
        Ok(config)
    }

    pub fn source_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            base_url: self.source.base_url.clone(),
            path: self.source.path.clone(),
            bearer_token: self.source.bearer_token.clone(),
            envelope_field: self.source.envelope_field.clone(),
            request_timeout: self.sync.request_timeout(),
            connect_timeout: Duration::from_secs(self.source.connect_timeout_secs),
        }
    }

    pub fn store_config(&self) -> SqliteStoreConfig {
        SqliteStoreConfig {
            database_url: self.database.url.clone(),
            table: self.database.table.clone(),
            max_connections: self.database.max_connections,
            rules: self.sync.sanitize_rules(),
        }
    }
}
