//! Configuration loading
//!
//! Sources are layered, later ones winning:
//! 1. Built-in defaults
//! 2. TOML file (`--config`, `CADENCE_CONFIG_PATH`, or `./cadence.toml` if present)
//! 3. Environment variables prefixed with `CADENCE_` (`__` separates sections,
//!    e.g. `CADENCE_WORKER__SLOTS=8`), plus the flat `CADENCE_DATABASE_URL`
//! 4. Programmatic overrides from the builder

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "CADENCE";
const ENV_DATABASE_URL: &str = "CADENCE_DATABASE_URL";
const ENV_CONFIG_PATH: &str = "CADENCE_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "cadence";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of jobs processed concurrently
    pub slots: usize,
    /// Sleep between claim attempts when the queue is empty
    pub poll_interval_ms: u64,
    /// Attempts at persisting an outcome before giving up
    pub persist_attempts: u32,
    pub persist_backoff_ms: u64,
    pub queue: String,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn persist_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            slots: 4,
            poll_interval_ms: 100,
            persist_attempts: 3,
            persist_backoff_ms: 200,
            queue: "default".to_string(),
        }
    }
}

/// Configuration of the service that owns the handlers.
///
/// Shared by every job the service runs and exposed to handlers through
/// [`JobContext::config_value`](crate::context::JobContext::config_value).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub settings: BTreeMap<String, JsonValue>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: BTreeMap::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.settings.get(key)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new("cadence")
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from the default sources
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.slots == 0 {
            bail!("worker.slots must be at least 1");
        }
        if self.worker.persist_attempts == 0 {
            bail!("worker.persist_attempts must be at least 1");
        }
        if self.worker.queue.trim().is_empty() {
            bail!("worker.queue must not be empty");
        }
        if self.database.min_connections > self.database.max_connections {
            bail!(
                "database.min_connections ({}) exceeds database.max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }
        Ok(())
    }

    /// The database URL, required by every database-backed command
    pub fn database_url(&self) -> Result<&str> {
        match self.database.url.as_deref() {
            Some(url) if !url.is_empty() => Ok(url),
            _ => bail!(
                "Database URL not configured. Set {} or pass --database-url",
                ENV_DATABASE_URL
            ),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    database_url: Option<String>,
    config_path: Option<PathBuf>,
    worker_slots: Option<usize>,
    skip_env: bool,
}

impl ConfigBuilder {
    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn worker_slots(mut self, slots: Option<usize>) -> Self {
        self.worker_slots = slots;
        self
    }

    /// Ignore `.env` and process environment. Used by tests.
    pub fn skip_env(mut self, skip: bool) -> Self {
        self.skip_env = skip;
        self
    }

    pub fn build(self) -> Result<Config> {
        if !self.skip_env {
            let _ = dotenvy::dotenv();
        }

        let config_path = self.config_path.or_else(|| {
            if self.skip_env {
                None
            } else {
                std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from)
            }
        });

        let mut builder = config::Config::builder();

        builder = match &config_path {
            Some(path) => builder.add_source(config::File::from(path.as_path()).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        if !self.skip_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

            if let Ok(url) = std::env::var(ENV_DATABASE_URL) {
                builder = builder.set_override("database.url", url)?;
            }
        }

        if let Some(url) = self.database_url {
            builder = builder.set_override("database.url", url)?;
        }
        if let Some(slots) = self.worker_slots {
            builder = builder.set_override("worker.slots", slots as u64)?;
        }

        let config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }
}
