//! Moves due entries from the retry and delayed sets back onto their queues.

use std::sync::Arc;
use std::time::Duration;

use qwork_queue::time::now_seconds;
use qwork_queue::{JobQueue, Msg, QueueResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::failure::FailureTracker;

const MAX_LOGGED_FAILURES: u32 = 3;

pub struct Scheduled {
    queue: JobQueue,
    keys: Vec<String>,
    interval: Duration,
    stop: watch::Sender<bool>,
}

impl Scheduled {
    /// Poll the given sorted sets (unnamespaced, e.g. `retry`) every
    /// `poll_interval` of the queue config.
    pub fn new(queue: JobQueue, keys: &[&str]) -> Self {
        let interval = queue.config().poll_interval;
        Self {
            queue,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            interval,
            stop: watch::Sender::new(false),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Requeue every entry due at the time of the call. Returns how many
    /// were pushed back onto a queue.
    pub async fn poll(&self) -> QueueResult<usize> {
        let now = now_seconds();
        let store = self.queue.store();
        let mut requeued = 0;

        for key in &self.keys {
            let key = self.queue.keys().namespaced(key);

            while let Some(raw) = store.zfirst_due(&key, now).await? {
                if store.zrem(&key, &raw).await? == 0 {
                    // Another poller took it.
                    debug!(key = %key, "Lost requeue race");
                    break;
                }

                match self.requeue(&raw).await {
                    Ok(true) => requeued += 1,
                    Ok(false) => {}
                    Err(e) => {
                        if let Err(restore) = store.zadd(&key, now, &raw).await {
                            error!(
                                key = %key,
                                payload = %raw,
                                "Failed to restore entry: {}", restore
                            );
                        }
                        return Err(e);
                    }
                }
            }
        }

        if requeued > 0 {
            info!(requeued, "Requeued due jobs");
        }
        Ok(requeued)
    }

    /// Push a removed entry back onto its queue; `false` when it was dropped.
    async fn requeue(&self, raw: &str) -> QueueResult<bool> {
        let mut msg = match Msg::parse(raw) {
            Ok(msg) => msg,
            Err(e) => {
                error!(payload = raw, "Dropping undecodable scheduled entry: {}", e);
                return Ok(false);
            }
        };

        let Some(queue) = msg.queue().map(|q| self.queue.keys().strip(q).to_string()) else {
            error!(payload = raw, "Dropping scheduled entry without a queue");
            return Ok(false);
        };

        msg.set("enqueued_at", now_seconds());
        msg.set("queue", queue.as_str());
        self.queue
            .store()
            .lpush(&self.queue.keys().queue(&queue), &msg.to_json())
            .await?;
        debug!(queue = %queue, jid = msg.jid().unwrap_or_default(), "Requeued");
        Ok(true)
    }

    /// Poll on an interval until [`Scheduled::quit`].
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduled = Arc::clone(self);
        tokio::spawn(async move { scheduled.run().await })
    }

    /// Ask the poll loop to stop; it exits before its next poll.
    pub fn quit(&self) {
        self.stop.send_replace(true);
    }

    async fn run(&self) {
        let mut stop = self.stop.subscribe();
        let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);
        info!(interval_secs = self.interval.as_secs_f64(), "Scheduled poller started");

        while !*stop.borrow_and_update() {
            match self.poll().await {
                Ok(_) => failures.record_success(),
                Err(e) => {
                    if failures.record_failure() {
                        error!("Scheduled poll failed: {}", e);
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop.changed() => {}
            }
        }
        info!("Scheduled poller stopped");
    }
}
