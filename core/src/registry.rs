//! Explicit handler registration
//!
//! Jobs name the handler they should run. The registry maps that name to a
//! factory producing the handler for one invocation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::JobError;
use crate::handler::JobHandler;
use crate::handlers::{LogArgumentsHandler, LOG_ARGUMENTS};

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn JobHandler> + Send + Sync>;

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(LOG_ARGUMENTS, || LogArgumentsHandler);
        registry
    }

    /// Register a factory called once per dispatched job.
    /// Replaces any handler already registered under `name`.
    pub fn register<F, H>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: JobHandler + 'static,
    {
        let name = name.into();
        if self
            .factories
            .insert(
                name.clone(),
                Arc::new(move || Arc::new(factory()) as Arc<dyn JobHandler>),
            )
            .is_some()
        {
            tracing::warn!(handler = %name, "Replaced existing handler registration");
        }
        self
    }

    /// Register one handler instance shared by every invocation
    pub fn register_shared(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> &mut Self {
        let name = name.into();
        if self
            .factories
            .insert(name.clone(), Arc::new(move || handler.clone()))
            .is_some()
        {
            tracing::warn!(handler = %name, "Replaced existing handler registration");
        }
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn JobHandler>, JobError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| JobError::UnknownHandler(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
