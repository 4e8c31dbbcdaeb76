use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::error::StorageError;
use crate::handler::handler_fn;
use crate::handlers::LOG_ARGUMENTS;
use crate::queue::MemoryQueue;
use crate::sink::MemorySink;

fn worker_config(slots: usize) -> WorkerConfig {
    WorkerConfig {
        slots,
        poll_interval_ms: 10,
        persist_attempts: 3,
        persist_backoff_ms: 5,
        queue: "default".to_string(),
    }
}

fn build_worker(
    queue: Arc<dyn JobQueue>,
    registry: HandlerRegistry,
    slots: usize,
) -> (Worker, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let worker = Worker::new(
        queue,
        Arc::new(registry),
        HandlerRunner::new(sink.clone()),
        Arc::new(ServiceConfig::new("helios")),
        worker_config(slots),
    );
    (worker, sink)
}

/// Wait until `queue` holds `expected` outcomes, failing after a few seconds
async fn wait_for_outcomes(queue: &MemoryQueue, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.outcomes().len() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for outcomes");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_persists_one_outcome_per_job() {
    let queue = Arc::new(MemoryQueue::new());
    queue.push(RawJob::new("good", LOG_ARGUMENTS, Some(r#"{"a": 1}"#.to_string())));
    queue.push(RawJob::new("malformed", LOG_ARGUMENTS, Some("{not json".to_string())));
    queue.push(RawJob::new("unknown", "does_not_exist", None));

    let (worker, sink) = build_worker(queue.clone(), HandlerRegistry::with_builtins(), 2);
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(worker.run(shutdown.clone()));

    wait_for_outcomes(&queue, 3).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(queue.outcome_for(&JobId::from("good")), Some(Outcome::completed()));
    assert_eq!(
        sink.messages_for(&JobId::from("good")),
        vec!["Argname: a Value: 1"]
    );

    match queue.outcome_for(&JobId::from("malformed")) {
        Some(Outcome::Failed { reason, retryable }) => {
            assert!(!retryable);
            assert!(reason.starts_with("malformed job"), "reason was {:?}", reason);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(sink.lines_for(&JobId::from("malformed")).is_empty());

    assert_eq!(
        queue.outcome_for(&JobId::from("unknown")),
        Some(Outcome::failed(
            "no handler registered for 'does_not_exist'",
            false
        ))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_cancels_in_flight_job() {
    let queue = Arc::new(MemoryQueue::new());
    queue.push(RawJob::new("slow", "slow", None));

    let started = Arc::new(tokio::sync::Notify::new());
    let notify = started.clone();
    let mut registry = HandlerRegistry::new();
    registry.register_shared(
        "slow",
        Arc::new(handler_fn(move |_ctx, completion| {
            let notify = notify.clone();
            async move {
                notify.notify_one();
                tokio::time::sleep(Duration::from_secs(60)).await;
                completion.complete(None);
                Ok(())
            }
        })),
    );

    let (worker, _sink) = build_worker(queue.clone(), registry, 1);
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(worker.run(shutdown.clone()));

    started.notified().await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("worker must stop promptly")
        .unwrap()
        .unwrap();

    assert_eq!(
        queue.outcome_for(&JobId::from("slow")),
        Some(Outcome::failed("cancelled", true))
    );
}

/// Queue whose persistence fails a fixed number of times
struct FlakyQueue {
    inner: MemoryQueue,
    failures_left: AtomicUsize,
    persist_calls: AtomicUsize,
}

impl FlakyQueue {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryQueue::new(),
            failures_left: AtomicUsize::new(failures),
            persist_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl JobQueue for FlakyQueue {
    async fn claim_next_job(&self) -> Result<Option<RawJob>, StorageError> {
        self.inner.claim_next_job().await
    }

    async fn persist_outcome(&self, job_id: &JobId, outcome: &Outcome) -> Result<(), StorageError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Backend("connection reset".to_string()));
        }
        self.inner.persist_outcome(job_id, outcome).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_persist_retries_until_success() {
    let queue = Arc::new(FlakyQueue::new(2));
    queue.inner.push(RawJob::new("job-1", LOG_ARGUMENTS, None));

    let (worker, _sink) = build_worker(queue.clone(), HandlerRegistry::with_builtins(), 1);
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(worker.run(shutdown.clone()));

    wait_for_outcomes(&queue.inner, 1).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(queue.persist_calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        queue.inner.outcome_for(&JobId::from("job-1")),
        Some(Outcome::completed())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_persist_failure_surfaces_to_supervisor() {
    let queue = Arc::new(FlakyQueue::new(usize::MAX));
    queue.inner.push(RawJob::new("job-1", LOG_ARGUMENTS, None));

    let (worker, _sink) = build_worker(queue.clone(), HandlerRegistry::with_builtins(), 2);

    let result = tokio::time::timeout(Duration::from_secs(5), worker.run(CancellationToken::new()))
        .await
        .expect("worker must stop after giving up");

    let err = result.unwrap_err();
    assert!(err.to_string().contains("connection reset"), "error was {}", err);
    assert_eq!(queue.persist_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_dispatches_registered_handler() {
    let queue = Arc::new(MemoryQueue::new());
    let mut registry = HandlerRegistry::new();
    registry.register("flaky", || {
        handler_fn(|ctx, completion| async move {
            completion.fail(format!("attempt {} failed", ctx.attempt()), true);
            Ok(())
        })
    });

    let (worker, _sink) = build_worker(queue, registry, 1);
    let mut raw = RawJob::new("job-1", "flaky", None);
    raw.attempt = 2;

    let outcome = worker.execute(raw, &CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::failed("attempt 2 failed", true));
}
