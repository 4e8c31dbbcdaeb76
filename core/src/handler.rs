//! Handler plugin interface
//!
//! A handler receives the job context and a completion handle, does its work,
//! and reports exactly one outcome through the handle. Returning an error (or
//! panicking) is captured by the runner and turns into a non-retryable
//! failure.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::completion::CompletionHandle;
use crate::context::JobContext;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn invoke(
        &self,
        context: Arc<JobContext>,
        completion: CompletionHandle,
    ) -> anyhow::Result<()>;
}

/// Handler backed by an async closure
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`JobHandler`]
///
/// ```rust,ignore
/// let handler = handler_fn(|ctx, completion| async move {
///     completion.log(format!("running {}", ctx.job_id()));
///     completion.complete(None);
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Arc<JobContext>, CompletionHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Arc<JobContext>, CompletionHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn invoke(
        &self,
        context: Arc<JobContext>,
        completion: CompletionHandle,
    ) -> anyhow::Result<()> {
        (self.f)(context, completion).await
    }
}
