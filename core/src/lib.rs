pub mod application;
pub mod cli;
pub mod completion;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod init;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod sink;
pub mod types;
pub mod worker;

// Re-export main types
pub use types::*;

pub use completion::CompletionHandle;
pub use context::JobContext;
pub use error::{JobError, SinkError, StorageError};
pub use handler::{handler_fn, JobHandler};
pub use registry::HandlerRegistry;
pub use runner::HandlerRunner;

// Re-export init API for convenience
pub use init::{initialize, InitBuilder, InitOptions};
