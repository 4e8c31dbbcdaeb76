//! Initialization for Cadence
//!
//! Loads configuration, connects to the database and optionally runs
//! migrations, returning an [`Application`].
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_core::init::InitBuilder;
//! use cadence_core::registry::HandlerRegistry;
//!
//! let app = InitBuilder::new()
//!     .database_url("postgresql://localhost/cadence")
//!     .handlers(HandlerRegistry::with_builtins())
//!     .init()
//!     .await?;
//!
//! app.worker().run(shutdown).await?;
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::application::Application;
use crate::config::Config;
use crate::db;
use crate::registry::HandlerRegistry;

/// Options for initializing Cadence
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Database URL (overrides config file and env vars)
    pub database_url: Option<String>,

    /// Config file path (overrides default search)
    pub config_path: Option<String>,

    /// Number of worker slots (overrides config file and env vars)
    pub worker_slots: Option<usize>,

    /// Whether to automatically run migrations if database is not initialized
    pub auto_migrate: bool,

    /// Handlers available to workers
    pub handlers: HandlerRegistry,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            database_url: None,
            config_path: None,
            worker_slots: None,
            auto_migrate: true,
            handlers: HandlerRegistry::with_builtins(),
        }
    }
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.options.database_url = Some(url.into());
        self
    }

    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn worker_slots(mut self, slots: usize) -> Self {
        self.options.worker_slots = Some(slots);
        self
    }

    pub fn auto_migrate(mut self, auto: bool) -> Self {
        self.options.auto_migrate = auto;
        self
    }

    /// Replace the handler registry (built-in handlers by default)
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.options.handlers = handlers;
        self
    }

    pub async fn init(self) -> Result<Application> {
        initialize(self.options).await
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration from the init options
pub fn load_config(options: &InitOptions) -> Result<Config> {
    Config::builder()
        .database_url(options.database_url.clone())
        .config_path(options.config_path.as_ref().map(PathBuf::from))
        .worker_slots(options.worker_slots)
        .build()
        .context("Failed to load configuration")
}

/// Initialize Cadence and return an Application instance
pub async fn initialize(options: InitOptions) -> Result<Application> {
    let config = load_config(&options)?;
    config.database_url()?;

    let pool = db::connect(&config.database).await?;

    if !db::is_initialized(&pool).await? {
        if options.auto_migrate {
            tracing::info!("Database not initialized, running migrations");
            db::migrate(&pool)
                .await
                .context("Failed to run automatic migrations")?;
        } else {
            anyhow::bail!("Database has not been initialized\n\nRun `cadence migrate` first");
        }
    }

    Ok(Application::new(config, pool, options.handlers))
}
