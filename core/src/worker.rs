//! Worker loop
//!
//! Each worker slot repeatedly claims a job, dispatches it to its handler
//! and persists the outcome. Slots share nothing but the queue, the
//! registry and the log sink.

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ServiceConfig, WorkerConfig};
use crate::context::JobContext;
use crate::error::JobError;
use crate::queue::JobQueue;
use crate::registry::HandlerRegistry;
use crate::runner::HandlerRunner;
use crate::types::{JobId, Outcome, RawJob};

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    registry: Arc<HandlerRegistry>,
    runner: HandlerRunner,
    service: Arc<ServiceConfig>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        registry: Arc<HandlerRegistry>,
        runner: HandlerRunner,
        service: Arc<ServiceConfig>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            runner,
            service,
            config,
        }
    }

    /// Run every slot until `shutdown` fires.
    ///
    /// Jobs in flight at shutdown resolve as cancelled and are still
    /// persisted. If an outcome cannot be persisted after the configured
    /// number of attempts, all slots stop and the error is returned.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let slots = self.config.slots.max(1);
        let stop = shutdown.child_token();
        let worker = Arc::new(self);

        info!(
            slots,
            service = %worker.service.name,
            handlers = ?worker.registry.names(),
            "Worker started"
        );

        let mut tasks = JoinSet::new();
        for slot in 0..slots {
            let worker = worker.clone();
            let stop = stop.clone();
            tasks.spawn(async move { worker.run_slot(slot, stop).await });
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => anyhow::Error::from(e),
                Err(e) => anyhow::anyhow!("worker slot task failed: {}", e),
            };
            error!(error = %failure, "Worker slot stopped, shutting down");
            stop.cancel();
            if result.is_ok() {
                result = Err(failure);
            }
        }

        info!("Worker stopped");
        result
    }

    async fn run_slot(&self, slot: usize, stop: CancellationToken) -> Result<(), JobError> {
        debug!(slot, "Worker slot started");

        while !stop.is_cancelled() {
            let raw = match self.queue.claim_next_job().await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    self.idle(&stop).await;
                    continue;
                }
                Err(e) => {
                    warn!(slot, error = %e, "Failed to claim job");
                    self.idle(&stop).await;
                    continue;
                }
            };

            let job_id = raw.id.clone();
            let outcome = self.execute(raw, &stop).await;
            self.persist(&job_id, &outcome).await?;
        }

        debug!(slot, "Worker slot stopped");
        Ok(())
    }

    /// Turn one claimed job into an outcome. Never fails: a malformed job or
    /// an unknown handler becomes a non-retryable failure without running
    /// any handler code.
    pub async fn execute(&self, raw: RawJob, cancel: &CancellationToken) -> Outcome {
        let context = match JobContext::from_raw(raw, self.service.clone()) {
            Ok(context) => context,
            Err(e) => {
                warn!(error = %e, "Rejected malformed job");
                return Outcome::failed(e.to_string(), false);
            }
        };

        let handler = match self.registry.resolve(context.handler()) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(job_id = %context.job_id(), error = %e, "Cannot dispatch job");
                return Outcome::failed(e.to_string(), false);
            }
        };

        self.runner
            .dispatch(context, handler, cancel.child_token())
            .await
    }

    /// Persist with bounded retries. The outcome is never dropped silently:
    /// the last storage error is returned to the caller.
    async fn persist(&self, job_id: &JobId, outcome: &Outcome) -> Result<(), JobError> {
        let attempts = self.config.persist_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.queue.persist_outcome(job_id, outcome).await {
                Ok(()) => {
                    debug!(job_id = %job_id, outcome = %outcome, "Persisted outcome");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        job_id = %job_id,
                        attempt,
                        attempts,
                        error = %e,
                        "Failed to persist outcome, retrying"
                    );
                    tokio::time::sleep(self.config.persist_backoff()).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        job_id = %job_id,
                        outcome = %outcome,
                        attempts,
                        error = %e,
                        "Giving up persisting outcome"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    async fn idle(&self, stop: &CancellationToken) {
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval()) => {}
        }
    }
}

#[cfg(test)]
mod tests;
