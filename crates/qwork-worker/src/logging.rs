//! Tracing setup and structured job logging.

use std::time::Duration;

use qwork_queue::Msg;
use tracing::{error, info, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::JobError;

/// Install the global subscriber: JSON when `LOG_FORMAT=json`, coloured text otherwise.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for consistent lifecycle events.
///
/// Every event carries the queue, jid and class of the message it was
/// built from.
#[derive(Debug, Clone)]
pub struct JobLogger {
    queue: String,
    jid: String,
    class: String,
}

impl JobLogger {
    pub fn new(queue: &str, msg: &Msg) -> Self {
        Self {
            queue: queue.to_string(),
            jid: msg.jid().unwrap_or_default().to_string(),
            class: msg.class().unwrap_or_default().to_string(),
        }
    }

    pub fn log_start(&self) {
        info!(
            queue = %self.queue,
            jid = %self.jid,
            class = %self.class,
            "Job started"
        );
    }

    pub fn log_completion(&self, elapsed: Duration) {
        info!(
            queue = %self.queue,
            jid = %self.jid,
            class = %self.class,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job completed"
        );
    }

    pub fn log_failure(&self, elapsed: Duration, fault: &JobError) {
        error!(
            queue = %self.queue,
            jid = %self.jid,
            class = %self.class,
            error_class = fault.class(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Job failed: {}", fault
        );
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn jid(&self) -> &str {
        &self.jid
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Span wrapping a single job execution.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            queue = %self.queue,
            jid = %self.jid,
            class = %self.class
        )
    }
}
