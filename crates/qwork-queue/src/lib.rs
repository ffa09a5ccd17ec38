//! Redis-backed job queue.
//!
//! This crate provides:
//! - The job message codec (`Msg`) and the producer-side wire schema
//! - The namespaced key schema shared by producers and workers
//! - A `Store` capability with Redis and in-memory implementations
//! - Job enqueueing, immediate or delayed

pub mod config;
pub mod error;
pub mod keys;
pub mod msg;
pub mod queue;
pub mod store;
pub mod time;

pub use config::QueueConfig;
pub use error::{MsgError, MsgResult, QueueError, QueueResult};
pub use keys::{Keys, RETRY_KEY, SCHEDULED_JOBS_KEY};
pub use msg::{generate_jid, EnqueueData, EnqueueOptions, Msg, RetryOptions};
pub use queue::JobQueue;
pub use store::{MemoryStore, RedisStore, Store};
