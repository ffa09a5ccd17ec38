//! Job processing for the qwork queue.
//!
//! This crate provides:
//! - Per-queue worker pools with crash-safe fetch/acknowledge
//! - The middleware chain with logging, retry and stats interceptors
//! - The poller that requeues delayed and retried jobs
//! - A process-level runner and stats snapshot

pub mod config;
pub mod error;
pub mod failure;
pub mod fetcher;
pub mod job;
pub mod logging;
pub mod manager;
pub mod middleware;
pub mod scheduled;
pub mod stats;
pub mod worker;
pub mod workers;

pub use config::{QueueSpec, WorkerConfig};
pub use error::{JobError, WorkerError, WorkerResult};
pub use fetcher::Fetcher;
pub use job::{Job, JobResult};
pub use logging::JobLogger;
pub use manager::{Manager, ManagerState};
pub use middleware::{
    JobOutcome, Middleware, MiddlewareLogging, MiddlewareRetry, MiddlewareStats, Middlewares, Next,
};
pub use scheduled::Scheduled;
pub use stats::WorkerStats;
pub use worker::{InFlight, Worker};
pub use workers::Workers;
