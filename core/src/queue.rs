//! Queue boundary
//!
//! The worker only needs two things from the queue: hand over the next
//! claimed job, and record the outcome once the job ran. Durability and
//! claim/lease semantics belong to the implementation.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::error::StorageError;
use crate::types::{JobId, Outcome, RawJob};

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Claim the next job, or `None` when nothing is ready
    async fn claim_next_job(&self) -> Result<Option<RawJob>, StorageError>;

    /// Record the outcome of a claimed job. May be retried, so it must be
    /// idempotent for the same `(job_id, outcome)`.
    async fn persist_outcome(&self, job_id: &JobId, outcome: &Outcome) -> Result<(), StorageError>;
}

/// Process-local queue for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<RawJob>>,
    outcomes: Mutex<Vec<(JobId, Outcome)>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: RawJob) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Persisted outcomes in persistence order
    pub fn outcomes(&self) -> Vec<(JobId, Outcome)> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn outcome_for(&self, job_id: &JobId) -> Option<Outcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|(id, _)| id == job_id)
            .map(|(_, outcome)| outcome.clone())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn claim_next_job(&self) -> Result<Option<RawJob>, StorageError> {
        Ok(self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front())
    }

    async fn persist_outcome(&self, job_id: &JobId, outcome: &Outcome) -> Result<(), StorageError> {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        match outcomes.iter_mut().find(|(id, _)| id == job_id) {
            Some(entry) => entry.1 = outcome.clone(),
            None => outcomes.push((job_id.clone(), outcome.clone())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claims_in_fifo_order() {
        let queue = MemoryQueue::new();
        queue.push(RawJob::new("a", "h", None));
        queue.push(RawJob::new("b", "h", None));

        assert_eq!(queue.claim_next_job().await.unwrap().unwrap().id.as_str(), "a");
        assert_eq!(queue.claim_next_job().await.unwrap().unwrap().id.as_str(), "b");
        assert!(queue.claim_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_is_idempotent() {
        let queue = MemoryQueue::new();
        let id = JobId::from("a");

        queue.persist_outcome(&id, &Outcome::completed()).await.unwrap();
        queue.persist_outcome(&id, &Outcome::completed()).await.unwrap();

        assert_eq!(queue.outcomes().len(), 1);
        assert_eq!(queue.outcome_for(&id), Some(Outcome::completed()));
    }
}
