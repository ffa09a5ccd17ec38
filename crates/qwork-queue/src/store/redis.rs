//! Redis implementation of [`Store`].

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::Store;
use crate::error::{QueueError, QueueResult};

/// Redis-backed store.
///
/// Ordinary commands share one multiplexed connection. Blocking claims
/// hold a connection for the whole wait, so they run on dedicated
/// connections kept in a small pool.
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    blocking: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisStore {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::connection_failed(format!("{redis_url}: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(format!("{redis_url}: {e}")))?;

        info!("Connected to Redis");

        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(Vec::new()),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    async fn checkout_blocking(&self) -> QueueResult<MultiplexedConnection> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        debug!("Opening dedicated connection for blocking claims");
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn checkin_blocking(&self, conn: MultiplexedConnection) {
        self.blocking.lock().await.push(conn);
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn sadd(&self, key: &str, member: &str) -> QueueResult<()> {
        let _: () = self.conn().sadd(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> QueueResult<Vec<String>> {
        Ok(self.conn().smembers(key).await?)
    }

    async fn lpush(&self, key: &str, value: &str) -> QueueResult<()> {
        let _: () = self.conn().lpush(key, value).await?;
        Ok(())
    }

    async fn llen(&self, key: &str) -> QueueResult<u64> {
        Ok(self.conn().llen(key).await?)
    }

    async fn lrange(&self, key: &str) -> QueueResult<Vec<String>> {
        Ok(self.conn().lrange(key, 0, -1).await?)
    }

    async fn lrem_last(&self, key: &str, value: &str) -> QueueResult<u64> {
        Ok(self.conn().lrem(key, -1, value).await?)
    }

    async fn claim(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> QueueResult<Option<String>> {
        let mut conn = self.checkout_blocking().await?;

        let result: Result<Option<String>, redis::RedisError> = redis::cmd("BLMOVE")
            .arg(source)
            .arg(destination)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await;

        // A connection that failed mid-command is not returned to the pool.
        match result {
            Ok(item) => {
                self.checkin_blocking(conn).await;
                Ok(item)
            }
            Err(e) => Err(QueueError::Redis(e)),
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> QueueResult<()> {
        let _: () = self.conn().zadd(key, member, score).await?;
        Ok(())
    }

    async fn zfirst_due(&self, key: &str, max: f64) -> QueueResult<Option<String>> {
        let members: Vec<String> = self
            .conn()
            .zrangebyscore_limit(key, "-inf", max, 0, 1)
            .await?;
        Ok(members.into_iter().next())
    }

    async fn zrem(&self, key: &str, member: &str) -> QueueResult<u64> {
        Ok(self.conn().zrem(key, member).await?)
    }

    async fn zcard(&self, key: &str) -> QueueResult<u64> {
        Ok(self.conn().zcard(key).await?)
    }

    async fn zrange_with_scores(&self, key: &str) -> QueueResult<Vec<(String, f64)>> {
        Ok(self.conn().zrange_withscores(key, 0, -1).await?)
    }

    async fn incr_all(&self, keys: &[String]) -> QueueResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.incr(key, 1).ignore();
        }
        let _: () = pipe.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn counter(&self, key: &str) -> QueueResult<i64> {
        let value: Option<i64> = self.conn().get(key).await?;
        Ok(value.unwrap_or(0))
    }
}
