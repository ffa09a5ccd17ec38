//! Job queue client: enqueueing and inspection.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::keys::Keys;
use crate::msg::{generate_jid, EnqueueData, EnqueueOptions, Msg};
use crate::store::{RedisStore, Store};
use crate::time::{now_seconds, to_seconds};

/// Job queue client.
///
/// Cheap to clone; every clone shares the same store and configuration.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn Store>,
    config: Arc<QueueConfig>,
    keys: Keys,
}

impl JobQueue {
    /// Validate the config and connect to Redis.
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        let store = RedisStore::connect(&config.redis_url).await?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Create from environment variables.
    pub async fn from_env() -> QueueResult<Self> {
        Self::connect(QueueConfig::from_env()?).await
    }

    /// Use an already constructed store.
    pub fn with_store(config: QueueConfig, store: Arc<dyn Store>) -> Self {
        let keys = config.keys();
        Self {
            store,
            config: Arc::new(config),
            keys,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn process_id(&self) -> &str {
        &self.config.process_id
    }

    /// Enqueue a job for immediate processing. Returns the job id.
    pub async fn enqueue<A: Serialize>(
        &self,
        queue: &str,
        class: &str,
        args: A,
    ) -> QueueResult<String> {
        self.enqueue_with_options(queue, class, args, EnqueueOptions::default()).await
    }

    /// Enqueue a job to run after `delay`.
    pub async fn enqueue_in<A: Serialize>(
        &self,
        queue: &str,
        class: &str,
        delay: Duration,
        args: A,
    ) -> QueueResult<String> {
        let opts = EnqueueOptions::new().with_at(now_seconds() + delay.as_secs_f64());
        self.enqueue_with_options(queue, class, args, opts).await
    }

    /// Enqueue a job to run at `at`.
    pub async fn enqueue_at<A: Serialize>(
        &self,
        queue: &str,
        class: &str,
        at: DateTime<Utc>,
        args: A,
    ) -> QueueResult<String> {
        let opts = EnqueueOptions::new().with_at(to_seconds(at));
        self.enqueue_with_options(queue, class, args, opts).await
    }

    /// Enqueue a job with explicit options.
    ///
    /// Jobs whose `at` lies in the future go to the delayed set; everything
    /// else is pushed onto the live queue.
    pub async fn enqueue_with_options<A: Serialize>(
        &self,
        queue: &str,
        class: &str,
        args: A,
        opts: EnqueueOptions,
    ) -> QueueResult<String> {
        if queue.is_empty() {
            return Err(QueueError::enqueue_failed("queue name must not be empty"));
        }

        let now = now_seconds();
        let data = EnqueueData {
            queue: queue.to_string(),
            class: class.to_string(),
            args: serde_json::to_value(args)?,
            jid: generate_jid(),
            enqueued_at: now,
            options: opts,
        };
        let payload = serde_json::to_string(&data)?;

        if let Some(at) = data.options.at.filter(|at| now < *at) {
            self.store.zadd(&self.keys.scheduled(), at, &payload).await?;
            debug!(queue, class, jid = %data.jid, at, "Scheduled job");
            return Ok(data.jid);
        }

        self.store.sadd(&self.keys.queues(), queue).await?;
        self.store.lpush(&self.keys.queue(queue), &payload).await?;

        info!(queue, class, jid = %data.jid, "Enqueued job");
        Ok(data.jid)
    }

    /// Names of every queue that has received a job.
    pub async fn queues(&self) -> QueueResult<Vec<String>> {
        self.store.smembers(&self.keys.queues()).await
    }

    /// Number of pending jobs on a queue.
    pub async fn queue_len(&self, queue: &str) -> QueueResult<u64> {
        self.store.llen(&self.keys.queue(queue)).await
    }

    pub async fn retry_len(&self) -> QueueResult<u64> {
        self.store.zcard(&self.keys.retry()).await
    }

    pub async fn scheduled_len(&self) -> QueueResult<u64> {
        self.store.zcard(&self.keys.scheduled()).await
    }

    /// Jobs awaiting retry with their due times.
    pub async fn retries(&self) -> QueueResult<Vec<(Msg, f64)>> {
        self.scored(&self.keys.retry()).await
    }

    /// Delayed jobs with their due times.
    pub async fn scheduled(&self) -> QueueResult<Vec<(Msg, f64)>> {
        self.scored(&self.keys.scheduled()).await
    }

    /// Jobs this process has claimed from `queue` but not acknowledged.
    pub async fn in_progress(&self, queue: &str) -> QueueResult<Vec<Msg>> {
        let key = self.keys.inprogress(queue, self.process_id());
        self.store
            .lrange(&key)
            .await?
            .iter()
            .map(|raw| Msg::parse(raw).map_err(QueueError::from))
            .collect()
    }

    /// Read a lifetime stat counter such as `processed` or `failed`.
    pub async fn counter(&self, metric: &str) -> QueueResult<i64> {
        self.store.counter(&self.keys.stat(metric)).await
    }

    async fn scored(&self, key: &str) -> QueueResult<Vec<(Msg, f64)>> {
        self.store
            .zrange_with_scores(key)
            .await?
            .into_iter()
            .map(|(raw, score)| -> QueueResult<(Msg, f64)> { Ok((Msg::parse(&raw)?, score)) })
            .collect()
    }
}
