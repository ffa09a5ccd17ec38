//! Crash-safe claim/acknowledge cycle for one queue.
//!
//! Claims move an item from the tail of the queue list onto the head of
//! this process's in-progress list in one store command. An item leaves the
//! in-progress list only when it is acknowledged, so anything claimed but
//! not finished when the process dies is still there on restart and is
//! replayed before new claims.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use qwork_queue::{JobQueue, Msg, QueueResult};
use tokio::sync::{mpsc, watch, Semaphore, SemaphorePermit};
use tracing::{debug, error, info, warn};

use crate::failure::FailureTracker;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);
const MAX_LOGGED_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchState {
    Running,
    /// Keep claiming until `remaining` more claims were made or the queue is empty.
    Draining { remaining: u64 },
    Closing,
}

pub struct Fetcher {
    queue_name: String,
    queue_key: String,
    inprogress_key: String,
    queue: JobQueue,
    ready: Semaphore,
    sender: Mutex<Option<mpsc::Sender<Msg>>>,
    state: watch::Sender<FetchState>,
    exited: watch::Sender<bool>,
}

impl Fetcher {
    /// Create a fetcher for `queue_name` (unnamespaced) and the receiving
    /// end of its message channel.
    pub fn new(queue_name: &str, queue: JobQueue, capacity: usize) -> (Self, mpsc::Receiver<Msg>) {
        let keys = queue.keys();
        let queue_key = keys.queue(queue_name);
        let inprogress_key = keys.inprogress(queue_name, queue.process_id());
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let fetcher = Self {
            queue_name: queue_name.to_string(),
            queue_key,
            inprogress_key,
            queue,
            ready: Semaphore::new(0),
            sender: Mutex::new(Some(tx)),
            state: watch::Sender::new(FetchState::Running),
            exited: watch::Sender::new(false),
        };
        (fetcher, rx)
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    pub fn inprogress_key(&self) -> &str {
        &self.inprogress_key
    }

    /// Grant one readiness permit; called by a worker that is about to wait
    /// for its next message.
    pub fn ready(&self) {
        self.ready.add_permits(1);
    }

    /// Run the fetch loop until closed or drained.
    ///
    /// The message sender is dropped on exit, so workers see the channel
    /// close once every delivered message has been received.
    pub async fn fetch(&self) {
        let Some(sender) = self.take_sender() else {
            warn!(queue = %self.queue_name, "Fetch loop already ran");
            return;
        };

        info!(queue = %self.queue_name, "Fetcher started");
        self.replay_inprogress(&sender).await;
        self.claim_loop(&sender).await;

        drop(sender);
        self.state.send_replace(FetchState::Closing);
        self.exited.send_replace(true);
        info!(queue = %self.queue_name, "Fetcher stopped");
    }

    /// Remove the message from the in-progress list.
    ///
    /// Matches the exact text the message was claimed as, searching from
    /// the tail.
    pub async fn acknowledge(&self, msg: &Msg) -> QueueResult<()> {
        let removed = self
            .queue
            .store()
            .lrem_last(&self.inprogress_key, msg.original_json())
            .await?;
        if removed == 0 {
            warn!(
                queue = %self.queue_name,
                jid = msg.jid().unwrap_or_default(),
                "Acknowledged message was not in progress"
            );
        }
        Ok(())
    }

    /// Stop issuing new claims without waiting.
    pub fn stop(&self) {
        self.state.send_replace(FetchState::Closing);
    }

    /// Stop issuing new claims and wait for the loop to exit.
    pub async fn close(&self) {
        self.stop();
        self.wait_exited().await;
    }

    pub fn closed(&self) -> bool {
        *self.state.borrow() == FetchState::Closing
    }

    /// Keep claiming until as many items as the queue holds right now were
    /// claimed, or a claim finds the queue empty; then wait for the loop to
    /// exit.
    pub async fn drain(&self) {
        let remaining = match self.queue.store().llen(&self.queue_key).await {
            Ok(len) => len,
            Err(e) => {
                error!(queue = %self.queue_name, "Failed to read queue length, closing: {}", e);
                0
            }
        };

        self.state.send_if_modified(|state| {
            if *state != FetchState::Running {
                return false;
            }
            *state = if remaining == 0 {
                FetchState::Closing
            } else {
                FetchState::Draining { remaining }
            };
            true
        });

        debug!(queue = %self.queue_name, remaining, "Draining");
        self.wait_exited().await;
    }

    fn take_sender(&self) -> Option<mpsc::Sender<Msg>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn started(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    async fn wait_exited(&self) {
        if !self.started() {
            return;
        }
        let mut exited = self.exited.subscribe();
        let _ = exited.wait_for(|done| *done).await;
    }

    /// Wait for a readiness permit; `None` once closing.
    async fn acquire_ready(&self) -> Option<SemaphorePermit<'_>> {
        let mut state = self.state.subscribe();
        loop {
            if *state.borrow_and_update() == FetchState::Closing {
                return None;
            }
            tokio::select! {
                permit = self.ready.acquire() => return permit.ok(),
                changed = state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Deliver whatever a previous run left in progress, oldest first.
    async fn replay_inprogress(&self, sender: &mpsc::Sender<Msg>) {
        let items = match self.queue.store().lrange(&self.inprogress_key).await {
            Ok(items) => items,
            Err(e) => {
                error!(queue = %self.queue_name, "Failed to read in-progress messages: {}", e);
                return;
            }
        };

        if items.is_empty() {
            return;
        }
        info!(queue = %self.queue_name, count = items.len(), "Recovering in-progress messages");

        // Claims land at the head, so the oldest item is at the tail.
        for raw in items.iter().rev() {
            let Some(permit) = self.acquire_ready().await else {
                return;
            };
            if self.deliver(sender, raw).await {
                permit.forget();
            }
        }
    }

    async fn claim_loop(&self, sender: &mpsc::Sender<Msg>) {
        let timeout = self.queue.config().fetch_timeout;
        let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);

        while let Some(permit) = self.acquire_ready().await {
            let draining = matches!(*self.state.borrow(), FetchState::Draining { .. });

            match self
                .queue
                .store()
                .claim(&self.queue_key, &self.inprogress_key, timeout)
                .await
            {
                Ok(Some(raw)) => {
                    failures.record_success();
                    if self.deliver(sender, &raw).await {
                        permit.forget();
                    }
                    if draining && self.spend_drain_budget() {
                        debug!(queue = %self.queue_name, "Drain budget spent");
                        break;
                    }
                }
                Ok(None) => {
                    failures.record_success();
                    drop(permit);
                    if draining {
                        debug!(queue = %self.queue_name, "Queue drained");
                        break;
                    }
                }
                Err(e) => {
                    if failures.record_failure() {
                        error!(queue = %self.queue_name, "Failed to claim message: {}", e);
                    }
                    drop(permit);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Count one drain claim; `true` once the budget is used up.
    fn spend_drain_budget(&self) -> bool {
        let mut spent = false;
        self.state.send_if_modified(|state| match state {
            FetchState::Draining { remaining } => {
                *remaining = remaining.saturating_sub(1);
                spent = *remaining == 0;
                true
            }
            _ => false,
        });
        spent
    }

    async fn deliver(&self, sender: &mpsc::Sender<Msg>, raw: &str) -> bool {
        let msg = match Msg::parse(raw) {
            Ok(msg) => msg,
            Err(e) => {
                error!(
                    queue = %self.queue_name,
                    payload = raw,
                    "Skipping undecodable message: {}", e
                );
                return false;
            }
        };

        debug!(queue = %self.queue_name, jid = msg.jid().unwrap_or_default(), "Claimed message");
        if sender.send(msg).await.is_err() {
            warn!(queue = %self.queue_name, "No workers left to receive message");
            return false;
        }
        true
    }
}
