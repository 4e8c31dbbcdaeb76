//! Postgres-backed job queue
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never take the
//! same job. A retryable failure puts the job back to `pending` while it has
//! attempts left.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StorageError;
use crate::queue::JobQueue;
use crate::types::{EnqueueJobParams, JobId, JobListFilter, JobRecord, JobStatus, Outcome, RawJob};

#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    queue: String,
    worker_id: String,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, queue: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn claim_next_job(&self) -> Result<Option<RawJob>, StorageError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running',
                worker_id = $1,
                claimed_at = NOW(),
                attempt = attempt + 1
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = $2
                  AND status = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, handler, args, attempt
            "#,
        )
        .bind(&self.worker_id)
        .bind(&self.queue)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| RawJob {
            id: row.get("id"),
            handler: row.get("handler"),
            args: row.get("args"),
            attempt: row.get("attempt"),
        }))
    }

    async fn persist_outcome(&self, job_id: &JobId, outcome: &Outcome) -> Result<(), StorageError> {
        let encoded = serde_json::to_value(outcome)?;

        // Only a job still running under this worker is updated, so a retried
        // call after a lost acknowledgement is a no-op.
        let result = if outcome.is_retryable() {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = CASE WHEN attempt < max_attempts THEN 'pending' ELSE 'failed' END,
                    outcome = $1,
                    worker_id = NULL,
                    claimed_at = NULL,
                    completed_at = CASE WHEN attempt < max_attempts THEN NULL ELSE NOW() END
                WHERE id = $2
                  AND status = 'running'
                  AND worker_id = $3
                "#,
            )
            .bind(&encoded)
            .bind(job_id)
            .bind(&self.worker_id)
            .execute(&self.pool)
            .await?
        } else {
            let status = if outcome.is_completed() {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = $1,
                    outcome = $2,
                    completed_at = NOW()
                WHERE id = $3
                  AND status = 'running'
                  AND worker_id = $4
                "#,
            )
            .bind(status)
            .bind(&encoded)
            .bind(job_id)
            .bind(&self.worker_id)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            // Either already persisted by an earlier attempt, or the job is gone
            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1)")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await?;
            if !exists {
                return Err(StorageError::NotFound(job_id.clone()));
            }
            tracing::debug!(job_id = %job_id, "Outcome already persisted");
        }

        Ok(())
    }
}

/// Enqueue a job, returning its id.
///
/// A user-provided id makes the call idempotent: enqueuing the same id twice
/// keeps the first job.
pub async fn enqueue_job(pool: &PgPool, params: EnqueueJobParams) -> Result<JobId> {
    let id = params.id.unwrap_or_else(|| Uuid::new_v4().to_string());

    sqlx::query(
        r#"
        INSERT INTO jobs (id, handler, queue, status, args, max_attempts)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(&params.handler)
    .bind(&params.queue)
    .bind(JobStatus::Pending)
    .bind(&params.args)
    .bind(params.max_attempts.max(1))
    .execute(pool)
    .await
    .context("Failed to enqueue job")?;

    Ok(JobId::from(id))
}

pub async fn get_job(pool: &PgPool, job_id: &str) -> Result<Option<JobRecord>> {
    let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get job")?;

    Ok(row.as_ref().map(job_from_row))
}

pub async fn list_jobs(pool: &PgPool, filter: JobListFilter) -> Result<Vec<JobRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM jobs
        WHERE ($1::text IS NULL OR queue = $1)
          AND ($2::text IS NULL OR status = $2)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(&filter.queue)
    .bind(filter.status)
    .bind(filter.limit.unwrap_or(100))
    .fetch_all(pool)
    .await
    .context("Failed to list jobs")?;

    Ok(rows.iter().map(job_from_row).collect())
}

fn job_from_row(row: &PgRow) -> JobRecord {
    JobRecord {
        id: row.get("id"),
        handler: row.get("handler"),
        queue: row.get("queue"),
        status: row.get("status"),
        args: row.get("args"),
        attempt: row.get("attempt"),
        max_attempts: row.get("max_attempts"),
        outcome: row.get("outcome"),
        worker_id: row.get("worker_id"),
        created_at: row.get("created_at"),
        claimed_at: row.get("claimed_at"),
        completed_at: row.get("completed_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_helpers::with_test_db;
    use serde_json::json;

    fn params(handler: &str, args: Option<&str>, max_attempts: i32) -> EnqueueJobParams {
        EnqueueJobParams {
            id: None,
            handler: handler.to_string(),
            queue: "test".to_string(),
            args: args.map(str::to_string),
            max_attempts,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore] // Requires database to be running
    async fn test_enqueue_claim_and_complete() {
        let pool = with_test_db().await;
        let queue = PgJobQueue::new(pool.clone(), "test", "worker-1");

        let id = enqueue_job(&pool, params("log_arguments", Some(r#"{"a": 1}"#), 1))
            .await
            .unwrap();

        let raw = queue.claim_next_job().await.unwrap().unwrap();
        assert_eq!(raw.id, id);
        assert_eq!(raw.attempt, 1);
        assert_eq!(raw.args.as_deref(), Some(r#"{"a": 1}"#));
        assert!(queue.claim_next_job().await.unwrap().is_none());

        queue.persist_outcome(&id, &Outcome::completed()).await.unwrap();
        // Second attempt after a lost acknowledgement is harmless
        queue.persist_outcome(&id, &Outcome::completed()).await.unwrap();

        let job = get_job(&pool, id.as_str()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.outcome, Some(json!({"status": "completed"})));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore] // Requires database to be running
    async fn test_retryable_failure_requeues_until_attempts_exhausted() {
        let pool = with_test_db().await;
        let queue = PgJobQueue::new(pool.clone(), "test", "worker-1");
        let id = enqueue_job(&pool, params("flaky", None, 2)).await.unwrap();

        queue.claim_next_job().await.unwrap().unwrap();
        queue
            .persist_outcome(&id, &Outcome::failed("disk full", true))
            .await
            .unwrap();
        let job = get_job(&pool, id.as_str()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let raw = queue.claim_next_job().await.unwrap().unwrap();
        assert_eq!(raw.attempt, 2);
        queue
            .persist_outcome(&id, &Outcome::failed("disk full", true))
            .await
            .unwrap();
        let job = get_job(&pool, id.as_str()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore] // Requires database to be running
    async fn test_persist_unknown_job_is_not_found() {
        let pool = with_test_db().await;
        let queue = PgJobQueue::new(pool, "test", "worker-1");

        let result = queue
            .persist_outcome(&JobId::from("missing"), &Outcome::completed())
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore] // Requires database to be running
    async fn test_list_jobs_filters_by_status() {
        let pool = with_test_db().await;
        enqueue_job(&pool, params("a", None, 1)).await.unwrap();
        enqueue_job(&pool, params("b", None, 1)).await.unwrap();

        let pending = list_jobs(
            &pool,
            JobListFilter {
                queue: Some("test".to_string()),
                status: Some(JobStatus::Pending),
                limit: Some(10),
            },
        )
        .await
        .unwrap();
        assert_eq!(pending.len(), 2);

        let completed = list_jobs(
            &pool,
            JobListFilter {
                status: Some(JobStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(completed.is_empty());
    }
}
