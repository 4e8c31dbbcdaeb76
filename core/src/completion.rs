//! Completion handle: the handler's write-once access to its outcome
//!
//! The first terminal call (`complete` or `fail`) fixes the outcome. Any
//! later terminal call, or one made after the invocation was cancelled, is a
//! protocol violation: it is logged as a warning and otherwise ignored.

use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::sink::{LogLevel, LogLine, LogSink};
use crate::types::{InvocationState, JobId, Outcome};

pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug)]
struct Slot {
    state: InvocationState,
    outcome: Option<Outcome>,
    cancelled: bool,
}

struct Invocation {
    job_id: JobId,
    sink: Arc<dyn LogSink>,
    slot: Mutex<Slot>,
}

/// Capability through which a handler reports its outcome and emits log lines.
///
/// Cheap to clone; all clones share the same outcome slot.
#[derive(Clone)]
pub struct CompletionHandle {
    inner: Arc<Invocation>,
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("job_id", &self.inner.job_id)
            .field("slot", &*self.slot())
            .finish()
    }
}

impl CompletionHandle {
    pub(crate) fn new(job_id: JobId, sink: Arc<dyn LogSink>) -> Self {
        Self {
            inner: Arc::new(Invocation {
                job_id,
                sink,
                slot: Mutex::new(Slot {
                    state: InvocationState::Pending,
                    outcome: None,
                    cancelled: false,
                }),
            }),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.inner.job_id
    }

    /// Report success. Returns `false` if the call was ignored.
    pub fn complete(&self, metadata: Option<JsonValue>) -> bool {
        self.settle(Outcome::Completed { metadata }, "complete")
    }

    /// Report failure. `retryable` tells the host whether to re-queue the job.
    /// Returns `false` if the call was ignored.
    pub fn fail(&self, reason: impl Into<String>, retryable: bool) -> bool {
        self.settle(Outcome::failed(reason, retryable), "fail")
    }

    /// Emit a log line tagged with this job
    pub fn log(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message.into());
    }

    pub fn state(&self) -> InvocationState {
        self.slot().state
    }

    /// The outcome reported so far, if any
    pub fn outcome(&self) -> Option<Outcome> {
        self.slot().outcome.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot().cancelled
    }

    /// `Pending -> Running`. No effect once the invocation has left `Pending`.
    pub(crate) fn start(&self) {
        let mut slot = self.slot();
        if slot.state == InvocationState::Pending {
            slot.state = InvocationState::Running;
        }
    }

    /// Fix `fallback` as the outcome unless the handler already reported one,
    /// and return the final outcome.
    pub(crate) fn resolve(&self, fallback: Outcome) -> Outcome {
        let mut slot = self.slot();
        match &slot.outcome {
            Some(outcome) => outcome.clone(),
            None => {
                slot.state = fallback.state();
                slot.outcome = Some(fallback.clone());
                fallback
            }
        }
    }

    /// Mark the invocation cancelled. An outcome reported before the signal
    /// stands; otherwise the invocation fails as retryable.
    pub(crate) fn cancel(&self) -> Outcome {
        {
            self.slot().cancelled = true;
        }
        self.resolve(Outcome::failed(CANCELLED_REASON, true))
    }

    fn settle(&self, outcome: Outcome, call: &str) -> bool {
        let violation = {
            let mut slot = self.slot();
            if slot.cancelled {
                Some(format!(
                    "protocol violation: `{}` called after cancellation, ignored",
                    call
                ))
            } else if let Some(existing) = &slot.outcome {
                Some(format!(
                    "protocol violation: `{}` called after the job was already reported as {}, ignored",
                    call,
                    existing.label()
                ))
            } else {
                slot.state = outcome.state();
                slot.outcome = Some(outcome);
                None
            }
        };

        match violation {
            Some(message) => {
                tracing::warn!(job_id = %self.inner.job_id, call, "{}", message);
                self.emit(LogLevel::Warn, message);
                false
            }
            None => true,
        }
    }

    fn emit(&self, level: LogLevel, message: String) {
        let line = LogLine {
            job_id: self.inner.job_id.clone(),
            level,
            message,
        };
        if let Err(e) = self.inner.sink.emit(&line) {
            tracing::debug!(job_id = %self.inner.job_id, error = %e, "Dropped handler log line");
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::sink::MemorySink;
    use serde_json::json;

    fn handle() -> (CompletionHandle, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let handle = CompletionHandle::new(JobId::from("job-1"), sink.clone());
        (handle, sink)
    }

    #[test]
    fn test_state_moves_from_pending_to_terminal() {
        let (handle, _sink) = handle();
        assert_eq!(handle.state(), InvocationState::Pending);

        handle.start();
        assert_eq!(handle.state(), InvocationState::Running);

        assert!(handle.complete(Some(json!({"rows": 3}))));
        assert_eq!(handle.state(), InvocationState::Completed);
        assert_eq!(
            handle.outcome(),
            Some(Outcome::Completed {
                metadata: Some(json!({"rows": 3}))
            })
        );

        // A terminal state is never left
        handle.start();
        assert_eq!(handle.state(), InvocationState::Completed);
    }

    #[test]
    fn test_first_terminal_call_wins() {
        let (handle, sink) = handle();
        handle.start();

        assert!(handle.fail("disk full", true));
        assert!(!handle.complete(None));
        assert!(!handle.fail("other", false));

        assert_eq!(handle.outcome(), Some(Outcome::failed("disk full", true)));

        let warnings: Vec<_> = sink
            .lines()
            .into_iter()
            .filter(|l| l.level == LogLevel::Warn)
            .collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].message.contains("`complete`"));
        assert!(warnings[0].message.contains("failed"));
    }

    #[test]
    fn test_cancel_without_outcome_fails_retryable() {
        let (handle, _sink) = handle();
        handle.start();

        let outcome = handle.cancel();
        assert_eq!(outcome, Outcome::failed(CANCELLED_REASON, true));
        assert!(handle.is_cancelled());
        assert_eq!(handle.state(), InvocationState::Failed);
    }

    #[test]
    fn test_cancel_keeps_reported_outcome() {
        let (handle, _sink) = handle();
        handle.start();
        handle.complete(None);

        assert_eq!(handle.cancel(), Outcome::completed());
    }

    #[test]
    fn test_terminal_call_after_cancel_is_ignored() {
        let (handle, sink) = handle();
        handle.start();
        handle.cancel();

        assert!(!handle.complete(None));
        assert_eq!(handle.outcome(), Some(Outcome::failed(CANCELLED_REASON, true)));

        let messages = sink.messages_for(&JobId::from("job-1"));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("after cancellation"));
    }

    #[test]
    fn test_resolve_does_not_overwrite() {
        let (handle, _sink) = handle();
        handle.complete(None);
        assert_eq!(
            handle.resolve(Outcome::failed("fallback", false)),
            Outcome::completed()
        );
    }

    #[test]
    fn test_sink_failure_is_swallowed() {
        struct Unavailable;
        impl LogSink for Unavailable {
            fn emit(&self, _line: &LogLine) -> Result<(), SinkError> {
                Err(SinkError::Unavailable("offline".to_string()))
            }
        }

        let handle = CompletionHandle::new(JobId::from("job-2"), Arc::new(Unavailable));
        handle.log("still fine");
        assert!(handle.complete(None));
        assert!(!handle.complete(None));
        assert_eq!(handle.outcome(), Some(Outcome::completed()));
    }

    #[test]
    fn test_log_lines_tagged_with_job() {
        let (handle, sink) = handle();
        handle.log("first");
        handle.warn("second");

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.job_id.as_str() == "job-1"));
        assert_eq!(lines[0].level, LogLevel::Info);
        assert_eq!(lines[1].level, LogLevel::Warn);
    }
}
