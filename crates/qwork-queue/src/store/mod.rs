//! Backing-store capability.
//!
//! The engine only needs a handful of list, set, sorted-set and counter
//! operations, each of which is atomic on its own. [`RedisStore`] is the
//! production implementation; [`MemoryStore`] mirrors Redis semantics in
//! process for tests and local development.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// SADD
    async fn sadd(&self, key: &str, member: &str) -> QueueResult<()>;

    /// SMEMBERS
    async fn smembers(&self, key: &str) -> QueueResult<Vec<String>>;

    /// LPUSH a single value onto the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> QueueResult<()>;

    /// LLEN
    async fn llen(&self, key: &str) -> QueueResult<u64>;

    /// The whole list, head first (LRANGE 0 -1).
    async fn lrange(&self, key: &str) -> QueueResult<Vec<String>>;

    /// Remove one occurrence of `value`, searching from the tail (LREM -1).
    /// Returns the number removed.
    async fn lrem_last(&self, key: &str, value: &str) -> QueueResult<u64>;

    /// Atomically move the tail of `source` onto the head of `destination`,
    /// waiting up to `timeout` for an item (BLMOVE RIGHT LEFT).
    async fn claim(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> QueueResult<Option<String>>;

    /// ZADD
    async fn zadd(&self, key: &str, score: f64, member: &str) -> QueueResult<()>;

    /// The lowest-scored member with score <= `max`, if any.
    async fn zfirst_due(&self, key: &str, max: f64) -> QueueResult<Option<String>>;

    /// ZREM; returns the number removed.
    async fn zrem(&self, key: &str, member: &str) -> QueueResult<u64>;

    /// ZCARD
    async fn zcard(&self, key: &str) -> QueueResult<u64>;

    /// All members with their scores, lowest first.
    async fn zrange_with_scores(&self, key: &str) -> QueueResult<Vec<(String, f64)>>;

    /// Increment every key by one in a single transaction.
    async fn incr_all(&self, keys: &[String]) -> QueueResult<()>;

    /// Read a counter; missing keys read as zero.
    async fn counter(&self, key: &str) -> QueueResult<i64>;
}
