//! Handler runner
//!
//! Executes one handler invocation per claimed job and always produces
//! exactly one [`Outcome`], whatever the handler does:
//! - first terminal call on the completion handle wins
//! - a normal return without a terminal call fails the job (non-retryable)
//! - an error or panic inside the handler fails the job (non-retryable)
//! - cancellation fails the job as retryable without waiting on the handler

use std::any::Any;
use std::sync::Arc;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::completion::CompletionHandle;
use crate::config::ServiceConfig;
use crate::context::JobContext;
use crate::error::JobError;
use crate::handler::JobHandler;
use crate::sink::LogSink;
use crate::types::{Outcome, RawJob};

pub const NO_COMPLETION_REASON: &str = "handler did not report completion";

#[derive(Clone)]
pub struct HandlerRunner {
    sink: Arc<dyn LogSink>,
}

impl HandlerRunner {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Build the context for a raw job and dispatch it.
    ///
    /// A malformed job is rejected with [`JobError::MalformedJob`] before
    /// any handler code runs.
    pub async fn dispatch_raw(
        &self,
        raw: RawJob,
        service: Arc<ServiceConfig>,
        handler: Arc<dyn JobHandler>,
        cancel: CancellationToken,
    ) -> Result<Outcome, JobError> {
        let context = JobContext::from_raw(raw, service)?;
        Ok(self.dispatch(context, handler, cancel).await)
    }

    /// Run `handler` for one job and return its outcome.
    ///
    /// Never fails and never propagates a handler fault. Returns as soon as
    /// `cancel` fires, aborting the handler task.
    pub async fn dispatch(
        &self,
        context: JobContext,
        handler: Arc<dyn JobHandler>,
        cancel: CancellationToken,
    ) -> Outcome {
        let context = Arc::new(context);
        let job_id = context.job_id().clone();
        let completion = CompletionHandle::new(job_id.clone(), self.sink.clone());

        if cancel.is_cancelled() {
            debug!(job_id = %job_id, "Job cancelled before dispatch");
            return completion.cancel();
        }

        completion.start();
        debug!(
            job_id = %job_id,
            handler = context.handler(),
            attempt = context.attempt(),
            "Dispatching job"
        );

        let mut task = tokio::spawn({
            let context = context.clone();
            let completion = completion.clone();
            async move { handler.invoke(context, completion).await }
        });

        let outcome = tokio::select! {
            biased;

            joined = &mut task => Self::settle(&completion, joined),

            _ = cancel.cancelled() => {
                task.abort();
                warn!(job_id = %job_id, "Job cancelled while running");
                completion.cancel()
            }
        };

        info!(job_id = %job_id, outcome = %outcome, "Job finished");
        outcome
    }

    fn settle(
        completion: &CompletionHandle,
        joined: Result<anyhow::Result<()>, JoinError>,
    ) -> Outcome {
        let job_id = completion.job_id();

        let fallback = match joined {
            Ok(Ok(())) => {
                if completion.outcome().is_none() {
                    warn!(job_id = %job_id, "Handler returned without reporting completion");
                }
                Outcome::failed(NO_COMPLETION_REASON, false)
            }
            Ok(Err(err)) => {
                let reason = format!("{:#}", err);
                if completion.outcome().is_some() {
                    warn!(job_id = %job_id, error = %reason, "Handler errored after reporting its outcome");
                } else {
                    error!(job_id = %job_id, error = %reason, "Handler failed");
                }
                Outcome::failed(reason, false)
            }
            Err(join_err) if join_err.is_panic() => {
                let reason = format!("handler panicked: {}", panic_message(join_err.into_panic()));
                error!(job_id = %job_id, error = %reason, "Handler panicked");
                Outcome::failed(reason, false)
            }
            Err(join_err) => {
                error!(job_id = %job_id, error = %join_err, "Handler task was aborted");
                Outcome::failed(format!("handler task aborted: {}", join_err), false)
            }
        };

        completion.resolve(fallback)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
