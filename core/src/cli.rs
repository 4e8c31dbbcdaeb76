use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::context::Arguments;
use crate::db;
use crate::init::{self, InitOptions};
use crate::types::{EnqueueJobParams, JobListFilter, JobStatus};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence - job workers with an explicit completion contract", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run database migrations
    Migrate,

    /// Run a worker until interrupted
    Worker {
        /// Number of jobs processed concurrently
        #[arg(long)]
        slots: Option<usize>,
    },

    /// Add a job to the queue
    Enqueue {
        /// Name of the handler that should run the job
        handler: String,

        /// Job arguments (JSON object)
        #[arg(default_value = "{}")]
        args: String,

        /// Queue to add the job to (defaults to the configured worker queue)
        #[arg(short = 'q', long = "queue")]
        queue: Option<String>,

        /// Attempts allowed for retryable failures
        #[arg(long, default_value = "1")]
        max_attempts: i32,

        /// Job ID (enqueuing the same ID twice keeps the first job)
        #[arg(long)]
        id: Option<String>,
    },

    /// Get the status of a job
    Status {
        /// Job ID to query
        job_id: String,
    },

    /// List jobs
    List {
        /// Filter by queue
        #[arg(short = 'q', long = "queue")]
        queue: Option<String>,

        /// Filter by status
        #[arg(short = 's', long = "status")]
        status: Option<JobStatus>,

        /// Number of results (default: 20)
        #[arg(short = 'l', long = "limit", default_value = "20")]
        limit: i64,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let slots = match &cli.command {
        Commands::Worker { slots } => *slots,
        _ => None,
    };

    let options = InitOptions {
        database_url: cli.database_url,
        config_path: cli.config,
        worker_slots: slots,
        auto_migrate: false,
        ..Default::default()
    };

    // Eagerly load and validate configuration before executing any command
    let config = init::load_config(&options)?;

    match cli.command {
        Commands::Migrate => {
            let pool = db::connect(&config.database).await?;
            println!("Running migrations...");
            db::migrate(&pool).await?;
            println!("Migrations complete!");
        }

        Commands::Worker { .. } => {
            let app = init::initialize(options).await?;

            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, shutting down");
                    trigger.cancel();
                }
            });

            app.worker().run(shutdown).await?;
        }

        Commands::Enqueue {
            handler,
            args,
            queue,
            max_attempts,
            id,
        } => {
            // Reject what a worker would reject as malformed
            Arguments::decode(&args).context("Invalid job arguments")?;

            let pool = db::connect(&config.database).await?;
            let job_id = db::jobs::enqueue_job(
                &pool,
                EnqueueJobParams {
                    id,
                    handler,
                    queue: queue.unwrap_or_else(|| config.worker.queue.clone()),
                    args: Some(args),
                    max_attempts,
                },
            )
            .await?;

            println!("✓ Job enqueued: {}", job_id);
        }

        Commands::Status { job_id } => {
            let pool = db::connect(&config.database).await?;
            match db::jobs::get_job(&pool, &job_id).await? {
                Some(job) => {
                    println!("Job: {}", job.id);
                    println!("Handler: {}", job.handler);
                    println!("Queue: {}", job.queue);
                    println!("Status: {:?}", job.status);
                    println!("Attempts: {}/{}", job.attempt, job.max_attempts);
                    println!("Created: {}", job.created_at);

                    if let Some(claimed_at) = job.claimed_at {
                        println!("Claimed: {}", claimed_at);
                    }
                    if let Some(completed_at) = job.completed_at {
                        println!("Completed: {}", completed_at);
                    }
                    if let Some(args) = job.args {
                        println!("\nArguments:");
                        println!("  {}", args);
                    }
                    if let Some(outcome) = job.outcome {
                        println!("\nOutcome:");
                        println!("  {}", outcome);
                    }
                }
                None => {
                    anyhow::bail!("Job {} not found", job_id);
                }
            }
        }

        Commands::List {
            queue,
            status,
            limit,
        } => {
            let pool = db::connect(&config.database).await?;
            let jobs = db::jobs::list_jobs(
                &pool,
                JobListFilter {
                    queue,
                    status,
                    limit: Some(limit),
                },
            )
            .await?;

            if jobs.is_empty() {
                println!("No jobs found");
                return Ok(());
            }

            println!("Found {} job(s):\n", jobs.len());

            for job in jobs {
                let id = job.id.as_str();
                let id_short = id.get(..12).unwrap_or(id);
                println!(
                    "  {}... | {:?} | {} | {}",
                    id_short, job.status, job.queue, job.handler
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enqueue() {
        let cli = Cli::try_parse_from([
            "cadence",
            "enqueue",
            "log_arguments",
            r#"{"a": 1}"#,
            "--queue",
            "reports",
            "--max-attempts",
            "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Enqueue {
                handler,
                args,
                queue,
                max_attempts,
                id,
            } => {
                assert_eq!(handler, "log_arguments");
                assert_eq!(args, r#"{"a": 1}"#);
                assert_eq!(queue.as_deref(), Some("reports"));
                assert_eq!(max_attempts, 3);
                assert!(id.is_none());
            }
            _ => panic!("expected enqueue command"),
        }
    }

    #[test]
    fn test_parse_list_status() {
        let cli = Cli::try_parse_from(["cadence", "list", "--status", "failed"]).unwrap();
        match cli.command {
            Commands::List { status, limit, .. } => {
                assert_eq!(status, Some(JobStatus::Failed));
                assert_eq!(limit, 20);
            }
            _ => panic!("expected list command"),
        }

        assert!(Cli::try_parse_from(["cadence", "list", "--status", "suspended"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "cadence",
            "worker",
            "--slots",
            "8",
            "--database-url",
            "postgresql://localhost/cadence",
        ])
        .unwrap();

        assert_eq!(cli.database_url.as_deref(), Some("postgresql://localhost/cadence"));
        assert!(matches!(cli.command, Commands::Worker { slots: Some(8) }));
    }
}
