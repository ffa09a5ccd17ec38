//! Worker error types.

use std::any::Any;

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] qwork_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// A fault raised by a job.
///
/// Jobs return these instead of panicking; a panic that escapes a job is
/// caught at the edge of the middleware chain and turned into
/// [`JobError::Panicked`].
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("{message}")]
    Raised {
        class: String,
        message: String,
        backtrace: Option<String>,
    },

    #[error("{0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// A fault with an error class, recorded as `error_class` on retry.
    pub fn raised(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised {
            class: class.into(),
            message: message.into(),
            backtrace: None,
        }
    }

    pub fn with_backtrace(self, trace: impl Into<String>) -> Self {
        match self {
            Self::Raised { class, message, .. } => Self::Raised {
                class,
                message,
                backtrace: Some(trace.into()),
            },
            Self::Failed(message) => Self::Raised {
                class: String::new(),
                message,
                backtrace: Some(trace.into()),
            },
            Self::Panicked(message) => Self::Raised {
                class: "Panic".to_string(),
                message,
                backtrace: Some(trace.into()),
            },
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "job panicked".to_string()
        };
        Self::Panicked(message)
    }

    /// Error class; empty when the job gave none.
    pub fn class(&self) -> &str {
        match self {
            Self::Failed(_) => "",
            Self::Raised { class, .. } => class,
            Self::Panicked(_) => "Panic",
        }
    }

    pub fn backtrace(&self) -> Option<&str> {
        match self {
            Self::Raised { backtrace, .. } => backtrace.as_deref(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }
}
