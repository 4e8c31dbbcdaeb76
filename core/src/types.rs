use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Opaque job identifier assigned by the queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A job as claimed from the queue, before its arguments are decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawJob {
    pub id: JobId,
    /// Name the handler is registered under
    pub handler: String,
    /// Encoded argument mapping; `None` means the job carries no arguments
    pub args: Option<String>,
    pub attempt: i32,
}

impl RawJob {
    pub fn new(id: impl Into<JobId>, handler: impl Into<String>, args: Option<String>) -> Self {
        Self {
            id: id.into(),
            handler: handler.into(),
            args,
            attempt: 1,
        }
    }
}

/// Terminal result of one handler invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<JsonValue>,
    },
    Failed {
        reason: String,
        retryable: bool,
    },
}

impl Outcome {
    pub fn completed() -> Self {
        Outcome::Completed { metadata: None }
    }

    pub fn failed(reason: impl Into<String>, retryable: bool) -> Self {
        Outcome::Failed {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }

    /// Whether the host should put the job back on the queue
    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::Failed { retryable: true, .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed { .. } => "completed",
            Outcome::Failed { .. } => "failed",
        }
    }

    /// The invocation state this outcome leaves the invocation in
    pub fn state(&self) -> InvocationState {
        match self {
            Outcome::Completed { .. } => InvocationState::Completed,
            Outcome::Failed { .. } => InvocationState::Failed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed { .. } => f.write_str("completed"),
            Outcome::Failed { reason, retryable } => {
                write!(f, "failed ({}, retryable={})", reason, retryable)
            }
        }
    }
}

/// Per-invocation state machine: `Pending -> Running -> {Completed, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, InvocationState::Completed | InvocationState::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!(
                "Invalid status: {}. Must be one of: pending, running, completed, failed",
                other
            )),
        }
    }
}

/// A job row as stored by the Postgres queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub handler: String,
    pub queue: String,
    pub status: JobStatus,
    pub args: Option<String>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub outcome: Option<JsonValue>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueJobParams {
    pub id: Option<String>,
    pub handler: String,
    pub queue: String,
    pub args: Option<String>,
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobListFilter {
    pub queue: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}
