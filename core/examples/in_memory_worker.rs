//! Runs a worker against an in-process queue: one job per built-in and
//! custom handler, then prints the outcomes.

use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::{ServiceConfig, WorkerConfig};
use cadence_core::queue::MemoryQueue;
use cadence_core::sink::TracingSink;
use cadence_core::worker::Worker;
use cadence_core::{handler_fn, HandlerRegistry, HandlerRunner, RawJob};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let mut registry = HandlerRegistry::with_builtins();
    registry.register("resize_image", || {
        handler_fn(|ctx, completion| async move {
            let Some(width) = ctx.argument("width").and_then(|v| v.as_u64()) else {
                completion.fail("missing width", false);
                return Ok(());
            };
            let max = ctx
                .config_value("max_width")
                .and_then(|v| v.as_u64())
                .unwrap_or(4096);
            if width > max {
                completion.fail(format!("width {} exceeds {}", width, max), false);
            } else {
                completion.log(format!("resized to {}px", width));
                completion.complete(Some(serde_json::json!({ "width": width })));
            }
            Ok(())
        })
    });

    let queue = Arc::new(MemoryQueue::new());
    queue.push(RawJob::new(
        "job-1",
        "log_arguments",
        Some(r#"{"file": "report.pdf", "pages": 12}"#.to_string()),
    ));
    queue.push(RawJob::new("job-2", "resize_image", Some(r#"{"width": 800}"#.to_string())));
    queue.push(RawJob::new("job-3", "resize_image", Some(r#"{"width": 9000}"#.to_string())));
    queue.push(RawJob::new("job-4", "resize_image", Some("{broken".to_string())));

    let worker = Worker::new(
        queue.clone(),
        Arc::new(registry),
        HandlerRunner::new(Arc::new(TracingSink)),
        Arc::new(ServiceConfig::new("demo").with_setting("max_width", 4096)),
        WorkerConfig {
            slots: 2,
            ..Default::default()
        },
    );

    let shutdown = CancellationToken::new();
    let running = tokio::spawn(worker.run(shutdown.clone()));

    while queue.outcomes().len() < 4 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    running.await??;

    for (job_id, outcome) in queue.outcomes() {
        println!("{}: {}", job_id, outcome);
    }
    Ok(())
}
