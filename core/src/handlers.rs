//! Built-in handlers

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::completion::CompletionHandle;
use crate::context::JobContext;
use crate::handler::JobHandler;

pub const LOG_ARGUMENTS: &str = "log_arguments";

/// Logs every argument of the job, then reports completion
#[derive(Debug, Clone, Copy, Default)]
pub struct LogArgumentsHandler;

#[async_trait]
impl JobHandler for LogArgumentsHandler {
    async fn invoke(
        &self,
        context: Arc<JobContext>,
        completion: CompletionHandle,
    ) -> anyhow::Result<()> {
        for (name, value) in context.all_arguments() {
            completion.log(format!("Argname: {} Value: {}", name, display_value(value)));
        }

        completion.complete(None);
        Ok(())
    }
}

// Strings print bare, everything else as JSON
fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
