//! The Cadence application instance
//!
//! Holds the configuration, the database pool and the handler registry, and
//! wires them into workers. Created by [`initialize`](crate::init::initialize).

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{Config, ServiceConfig};
use crate::db::jobs::PgJobQueue;
use crate::registry::HandlerRegistry;
use crate::runner::HandlerRunner;
use crate::sink::{LogSink, TracingSink};
use crate::worker::Worker;

pub struct Application {
    pub config: Config,
    pub pool: PgPool,
    pub registry: Arc<HandlerRegistry>,
    pub runner: HandlerRunner,
}

impl Application {
    /// Create a new Application instance (pure instantiation, no I/O)
    pub fn new(config: Config, pool: PgPool, registry: HandlerRegistry) -> Self {
        Self::with_sink(config, pool, registry, Arc::new(TracingSink))
    }

    pub fn with_sink(
        config: Config,
        pool: PgPool,
        registry: HandlerRegistry,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            config,
            pool,
            registry: Arc::new(registry),
            runner: HandlerRunner::new(sink),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Queue bound to the configured queue name, under a fresh worker id
    pub fn queue(&self) -> PgJobQueue {
        let worker_id = format!("{}-{}", self.config.service.name, Uuid::new_v4());
        PgJobQueue::new(self.pool.clone(), &self.config.worker.queue, worker_id)
    }

    pub fn worker(&self) -> Worker {
        Worker::new(
            Arc::new(self.queue()),
            self.registry.clone(),
            self.runner.clone(),
            Arc::new(self.service_config()),
            self.config.worker.clone(),
        )
    }

    pub fn service_config(&self) -> ServiceConfig {
        self.config.service.clone()
    }
}
