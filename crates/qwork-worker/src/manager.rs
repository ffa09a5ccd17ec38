//! Per-queue worker pool.

use std::sync::{Arc, Mutex, PoisonError};

use qwork_queue::{JobQueue, Msg};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::fetcher::Fetcher;
use crate::job::Job;
use crate::middleware::{Middleware, Middlewares};
use crate::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Constructed,
    Running,
    Preparing,
    Stopped,
}

/// Owns one queue's fetcher and a fixed pool of workers.
pub struct Manager {
    queue_name: String,
    queue_key: String,
    job: Arc<dyn Job>,
    concurrency: usize,
    middleware: Arc<Middlewares>,
    fetcher: Arc<Fetcher>,
    messages: Arc<tokio::sync::Mutex<mpsc::Receiver<Msg>>>,
    workers: Vec<Arc<Worker>>,
    state: Mutex<ManagerState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Manager {
    /// Build a manager for `queue_name`.
    ///
    /// Without `extras` the manager shares `default_chain`, so later appends
    /// to it apply here too. With `extras` it gets its own chain: a copy of
    /// the default chain's current members followed by `extras`.
    pub fn new(
        queue: &JobQueue,
        queue_name: &str,
        job: Arc<dyn Job>,
        concurrency: usize,
        default_chain: &Arc<Middlewares>,
        extras: &[Arc<dyn Middleware>],
    ) -> Self {
        let queue_name = queue.keys().strip(queue_name).to_string();
        let concurrency = concurrency.max(1);
        let middleware = if extras.is_empty() {
            Arc::clone(default_chain)
        } else {
            Arc::new(default_chain.snapshot_with(extras))
        };
        let (fetcher, messages) = Fetcher::new(&queue_name, queue.clone(), concurrency);

        let mut manager = Self {
            queue_key: queue.keys().queue(&queue_name),
            queue_name,
            job,
            concurrency,
            middleware,
            fetcher: Arc::new(fetcher),
            messages: Arc::new(tokio::sync::Mutex::new(messages)),
            workers: Vec::with_capacity(concurrency),
            state: Mutex::new(ManagerState::Constructed),
            tasks: Mutex::new(Vec::new()),
        };
        let workers = (0..concurrency)
            .map(|_| Arc::new(Worker::new(&manager)))
            .collect();
        manager.workers = workers;
        manager
    }

    /// Spawn the fetch loop and the worker pool. Must be called inside a
    /// Tokio runtime.
    pub fn start(&self) {
        {
            let mut state = self.lock_state();
            if *state != ManagerState::Constructed {
                warn!(queue = %self.queue_name, state = ?*state, "Manager already started");
                return;
            }
            *state = ManagerState::Running;
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let fetcher = Arc::clone(&self.fetcher);
        tasks.push(tokio::spawn(async move { fetcher.fetch().await }));
        for worker in &self.workers {
            tasks.push(tokio::spawn(
                Arc::clone(worker).run(Arc::clone(&self.messages)),
            ));
        }

        info!(
            queue = %self.queue_name,
            concurrency = self.concurrency,
            "Manager started"
        );
    }

    /// Stop new claims without waiting.
    pub fn prepare(&self) {
        let mut state = self.lock_state();
        if *state == ManagerState::Running {
            *state = ManagerState::Preparing;
            self.fetcher.stop();
            info!(queue = %self.queue_name, "Manager preparing to quit");
        }
    }

    /// Stop fetching and wait for every delivered message to finish.
    ///
    /// A manager that was not prepared first keeps claiming until it has
    /// taken as many jobs as the queue held when `quit` was called.
    pub async fn quit(&self) {
        let previous = {
            let mut state = self.lock_state();
            let previous = *state;
            if previous == ManagerState::Stopped {
                return;
            }
            *state = ManagerState::Preparing;
            previous
        };

        info!(
            queue = %self.queue_name,
            processing = self.processing(),
            workers = self.workers.len(),
            "Quitting"
        );

        match previous {
            ManagerState::Running => self.fetcher.drain().await,
            _ => self.fetcher.close().await,
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                error!(queue = %self.queue_name, "Manager task failed: {}", e);
            }
        }

        *self.lock_state() = ManagerState::Stopped;
        info!(queue = %self.queue_name, "Manager stopped");
    }

    /// Unnamespaced queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Namespaced queue list key.
    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }

    pub fn middleware(&self) -> &Arc<Middlewares> {
        &self.middleware
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    pub fn state(&self) -> ManagerState {
        *self.lock_state()
    }

    /// Number of workers currently running a job.
    pub fn processing(&self) -> usize {
        self.workers.iter().filter(|w| w.is_busy()).count()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
