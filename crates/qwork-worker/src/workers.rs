//! Process-level runner: every manager plus the scheduled poller.

use std::sync::{Arc, Mutex, PoisonError};

use qwork_queue::{JobQueue, QueueResult, RETRY_KEY, SCHEDULED_JOBS_KEY};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::WorkerResult;
use crate::job::Job;
use crate::manager::Manager;
use crate::middleware::{Middleware, Middlewares};
use crate::scheduled::Scheduled;
use crate::stats::{self, WorkerStats};

pub struct Workers {
    queue: JobQueue,
    middleware: Arc<Middlewares>,
    managers: Vec<Arc<Manager>>,
    scheduled: Arc<Scheduled>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Workers {
    pub fn new(queue: JobQueue) -> Self {
        Self {
            middleware: Arc::new(Middlewares::default_chain(&queue)),
            scheduled: Arc::new(Scheduled::new(
                queue.clone(),
                &[RETRY_KEY, SCHEDULED_JOBS_KEY],
            )),
            managers: Vec::new(),
            poller: Mutex::new(None),
            queue,
        }
    }

    /// The default chain shared by managers registered without extras.
    pub fn middleware(&self) -> &Arc<Middlewares> {
        &self.middleware
    }

    pub fn managers(&self) -> &[Arc<Manager>] {
        &self.managers
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Register `job` for `queue_name` using the default chain.
    pub fn process(
        &mut self,
        queue_name: &str,
        job: impl Job + 'static,
        concurrency: usize,
    ) -> Arc<Manager> {
        self.process_with(queue_name, job, concurrency, Vec::new())
    }

    /// Register `job` with extra interceptors appended to a copy of the
    /// default chain.
    pub fn process_with(
        &mut self,
        queue_name: &str,
        job: impl Job + 'static,
        concurrency: usize,
        extras: Vec<Arc<dyn Middleware>>,
    ) -> Arc<Manager> {
        let manager = Arc::new(Manager::new(
            &self.queue,
            queue_name,
            Arc::new(job),
            concurrency,
            &self.middleware,
            &extras,
        ));
        self.managers.push(Arc::clone(&manager));
        manager
    }

    pub fn start(&self) {
        for manager in &self.managers {
            manager.start();
        }

        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.is_none() {
            *poller = Some(self.scheduled.start());
        }
        info!(queues = self.managers.len(), "Workers started");
    }

    /// Stop the poller, stop every manager from claiming, then wait for
    /// each to finish its delivered work.
    pub async fn quit(&self) {
        self.scheduled.quit();
        for manager in &self.managers {
            manager.prepare();
        }
        for manager in &self.managers {
            manager.quit().await;
        }

        let poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = poller {
            if let Err(e) = handle.await {
                error!("Scheduled poller task failed: {}", e);
            }
        }
        info!("Workers stopped");
    }

    /// Start, wait for Ctrl-C, then quit.
    pub async fn run(&self) -> WorkerResult<()> {
        self.start();
        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");
        self.quit().await;
        Ok(())
    }

    pub async fn stats(&self) -> QueueResult<WorkerStats> {
        stats::collect(&self.queue, &self.managers).await
    }
}
