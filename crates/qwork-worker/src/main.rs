//! Queue worker binary.
//!
//! Processes every queue named in `WORKER_QUEUES` with a job that logs the
//! message it received.

use async_trait::async_trait;
use tracing::{error, info};

use qwork_queue::{JobQueue, Msg, QueueConfig};
use qwork_worker::logging::init_tracing;
use qwork_worker::{Job, JobResult, WorkerConfig, Workers};

struct LogJob;

#[async_trait]
impl Job for LogJob {
    async fn perform(&self, msg: &Msg) -> JobResult {
        info!(
            jid = msg.jid().unwrap_or_default(),
            class = msg.class().unwrap_or_default(),
            args = %msg.args(),
            "Received job"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting qwork-worker");

    let queue_config = match QueueConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid queue configuration: {}", e);
            std::process::exit(1);
        }
    };
    let worker_config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid worker configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", worker_config);

    let queue = match JobQueue::connect(queue_config).await {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    let mut workers = Workers::new(queue);
    for entry in &worker_config.queues {
        workers.process(&entry.name, LogJob, entry.concurrency);
    }

    if let Err(e) = workers.run().await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
