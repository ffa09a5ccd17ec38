//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

pub type MsgResult<T> = Result<T, MsgError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message error: {0}")]
    Msg(#[from] MsgError),
}

impl QueueError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Transport faults are worth retrying; everything else is a bug or bad data.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            QueueError::ConnectionFailed(_) | QueueError::Redis(_) | QueueError::Store(_)
        )
    }
}

/// Errors raised while decoding or reading a job message.
#[derive(Debug, Error)]
pub enum MsgError {
    #[error("Malformed message JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Message JSON must be an object")]
    NotAnObject,

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Field '{field}' is not a {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
    },
}

impl MsgError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    pub fn field_type(field: impl Into<String>, expected: &'static str) -> Self {
        Self::FieldType {
            field: field.into(),
            expected,
        }
    }
}
