//! A single job runner inside a manager's pool.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use qwork_queue::Msg;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::fetcher::Fetcher;
use crate::job::Job;
use crate::manager::Manager;
use crate::middleware::Middlewares;

/// The job a worker is running right now.
#[derive(Debug, Clone, Serialize)]
pub struct InFlight {
    pub message: Msg,
    pub started_at: DateTime<Utc>,
}

pub struct Worker {
    queue_name: String,
    job: Arc<dyn Job>,
    middleware: Arc<Middlewares>,
    fetcher: Arc<Fetcher>,
    current: Mutex<Option<InFlight>>,
}

impl Worker {
    pub fn new(manager: &Manager) -> Self {
        Self {
            queue_name: manager.queue_name().to_string(),
            job: Arc::clone(manager.job()),
            middleware: Arc::clone(manager.middleware()),
            fetcher: Arc::clone(manager.fetcher()),
            current: Mutex::new(None),
        }
    }

    /// Run the middleware chain and job for one message.
    ///
    /// Returns whether the message was acknowledged. A fault that escapes
    /// the chain is logged and the message stays in progress.
    pub async fn process(&self, msg: &Msg) -> bool {
        self.set_current(Some(InFlight {
            message: msg.clone(),
            started_at: Utc::now(),
        }));

        let mut working = msg.clone();
        let outcome = self
            .middleware
            .call(&self.queue_name, &mut working, self.job.as_ref())
            .await;

        self.set_current(None);

        let ack = match outcome {
            Ok(ack) => ack,
            Err(fault) => {
                error!(
                    queue = %self.queue_name,
                    jid = msg.jid().unwrap_or_default(),
                    "Job fault reached the worker, leaving message in progress: {}", fault
                );
                false
            }
        };

        if ack {
            if let Err(e) = self.fetcher.acknowledge(&working).await {
                error!(
                    queue = %self.queue_name,
                    jid = msg.jid().unwrap_or_default(),
                    "Failed to acknowledge message: {}", e
                );
            }
        }
        ack
    }

    /// Process messages until the channel closes.
    pub(crate) async fn run(
        self: Arc<Self>,
        messages: Arc<tokio::sync::Mutex<mpsc::Receiver<Msg>>>,
    ) {
        loop {
            self.fetcher.ready();
            let next = messages.lock().await.recv().await;
            match next {
                Some(msg) => {
                    self.process(&msg).await;
                }
                None => break,
            }
        }
        debug!(queue = %self.queue_name, "Worker stopped");
    }

    pub fn current(&self) -> Option<InFlight> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_busy(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn set_current(&self, current: Option<InFlight>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = current;
    }
}
