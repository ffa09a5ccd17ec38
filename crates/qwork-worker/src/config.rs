//! Worker configuration.

use crate::error::{WorkerError, WorkerResult};

const DEFAULT_QUEUES: &str = "default:10";
const DEFAULT_CONCURRENCY: usize = 10;

/// A queue to process and how many jobs may run on it at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub concurrency: usize,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queues to process, in registration order
    pub queues: Vec<QueueSpec>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: vec![QueueSpec {
                name: "default".to_string(),
                concurrency: DEFAULT_CONCURRENCY,
            }],
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// `WORKER_QUEUES` is a comma separated list of `name[:concurrency]`.
    pub fn from_env() -> WorkerResult<Self> {
        let raw = std::env::var("WORKER_QUEUES").unwrap_or_else(|_| DEFAULT_QUEUES.to_string());
        Ok(Self {
            queues: parse_queues(&raw)?,
        })
    }
}

pub fn parse_queues(raw: &str) -> WorkerResult<Vec<QueueSpec>> {
    let mut queues = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, concurrency) = match entry.split_once(':') {
            Some((name, n)) => {
                let concurrency = n.trim().parse::<usize>().map_err(|_| {
                    WorkerError::config_error(format!("invalid concurrency for queue {name}: {n}"))
                })?;
                (name.trim(), concurrency)
            }
            None => (entry, DEFAULT_CONCURRENCY),
        };

        if name.is_empty() {
            return Err(WorkerError::config_error(format!("empty queue name in {entry:?}")));
        }
        if concurrency == 0 {
            return Err(WorkerError::config_error(format!(
                "concurrency for queue {name} must be positive"
            )));
        }
        queues.push(QueueSpec {
            name: name.to_string(),
            concurrency,
        });
    }

    if queues.is_empty() {
        return Err(WorkerError::config_error("WORKER_QUEUES names no queues"));
    }
    Ok(queues)
}
