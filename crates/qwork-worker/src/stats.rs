//! Point-in-time view of the worker process.

use std::collections::BTreeMap;
use std::sync::Arc;

use qwork_queue::{JobQueue, QueueResult};
use serde::Serialize;

use crate::manager::Manager;
use crate::worker::InFlight;

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub processed: i64,
    pub failed: i64,
    /// Size of the retry set
    pub retries: u64,
    /// Pending jobs per managed queue
    pub enqueued: BTreeMap<String, u64>,
    /// Running jobs per managed queue
    pub jobs: BTreeMap<String, Vec<InFlight>>,
}

pub async fn collect(queue: &JobQueue, managers: &[Arc<Manager>]) -> QueueResult<WorkerStats> {
    let mut enqueued = BTreeMap::new();
    let mut jobs: BTreeMap<String, Vec<InFlight>> = BTreeMap::new();

    for manager in managers {
        enqueued.insert(
            manager.queue_name().to_string(),
            queue.queue_len(manager.queue_name()).await?,
        );
        jobs.insert(
            manager.queue_name().to_string(),
            manager.workers().iter().filter_map(|w| w.current()).collect(),
        );
    }

    Ok(WorkerStats {
        processed: queue.counter("processed").await?,
        failed: queue.counter("failed").await?,
        retries: queue.retry_len().await?,
        enqueued,
        jobs,
    })
}
