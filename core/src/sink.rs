//! Logging sinks for handler output
//!
//! Every line a handler emits goes through a [`LogSink`], tagged with the job
//! it belongs to. Sinks are shared by all worker slots, so implementations
//! must accept concurrent writes. Lines of one invocation arrive in the
//! order the handler emitted them.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::error::SinkError;
use crate::types::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub job_id: JobId,
    pub level: LogLevel,
    pub message: String,
}

pub trait LogSink: Send + Sync {
    /// Append one line. Must not block for long; errors are dropped by callers.
    fn emit(&self, line: &LogLine) -> Result<(), SinkError>;
}

/// Forwards handler lines to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, line: &LogLine) -> Result<(), SinkError> {
        match line.level {
            LogLevel::Info => tracing::info!(job_id = %line.job_id, "{}", line.message),
            LogLevel::Warn => tracing::warn!(job_id = %line.job_id, "{}", line.message),
        }
        Ok(())
    }
}

/// Keeps every line in memory, in emission order
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lines emitted for one job, in emission order
    pub fn lines_for(&self, job_id: &JobId) -> Vec<LogLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|line| &line.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn messages_for(&self, job_id: &JobId) -> Vec<String> {
        self.lines_for(job_id)
            .into_iter()
            .map(|line| line.message)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, line: &LogLine) -> Result<(), SinkError> {
        self.lines
            .lock()
            .map_err(|_| SinkError::Unavailable("memory sink poisoned".to_string()))?
            .push(line.clone());
        Ok(())
    }
}
