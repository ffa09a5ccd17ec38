//! Processed/failed counters.

use async_trait::async_trait;
use chrono::Utc;
use qwork_queue::time::format_day;
use qwork_queue::{JobQueue, Msg};
use tracing::error;

use super::{JobOutcome, Middleware, Next};

/// Counts successes and faults in the store and as `metrics` counters.
///
/// Faults are re-raised after counting.
pub struct MiddlewareStats {
    queue: JobQueue,
}

impl MiddlewareStats {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    async fn increment(&self, metric: &str, queue: &str) {
        let keys = self.queue.keys();
        let day = format_day(Utc::now());
        let counters = [keys.stat(metric), keys.daily_stat(metric, &day)];

        if let Err(e) = self.queue.store().incr_all(&counters).await {
            error!(queue, metric, "Failed to update stats: {}", e);
        }

        metrics::counter!(format!("qwork_jobs_{metric}_total"), "queue" => queue.to_string())
            .increment(1);
    }
}

#[async_trait]
impl Middleware for MiddlewareStats {
    async fn call(&self, queue: &str, msg: &mut Msg, next: Next<'_>) -> JobOutcome {
        let outcome = next.run(queue, msg).await;
        match &outcome {
            Ok(_) => self.increment("processed", queue).await,
            Err(_) => self.increment("failed", queue).await,
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::job::JobResult;
    use crate::middleware::Middlewares;
    use crate::testing::memory_queue;
    use std::sync::Arc;

    fn chain(queue: &JobQueue) -> Middlewares {
        let stats: Arc<dyn Middleware> = Arc::new(MiddlewareStats::new(queue.clone()));
        Middlewares::new(vec![stats])
    }

    fn msg() -> Msg {
        Msg::parse(r#"{"jid":"2","class":"Mailer","args":[]}"#).unwrap()
    }

    #[tokio::test]
    async fn test_success_increments_processed() {
        let queue = memory_queue();
        let day = format_day(Utc::now());
        let job = |_msg: Msg| async { JobResult::Ok(()) };

        let outcome = chain(&queue).call("myqueue", &mut msg(), &job).await;

        assert!(matches!(outcome, Ok(true)));
        assert_eq!(queue.counter("processed").await.unwrap(), 1);
        assert_eq!(queue.counter(&format!("processed:{day}")).await.unwrap(), 1);
        assert_eq!(queue.counter("failed").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_increments_failed_and_reraises() {
        let queue = memory_queue();
        let day = format_day(Utc::now());
        let job = |_msg: Msg| async { JobResult::Err(JobError::failed("AHHHH")) };

        let outcome = chain(&queue).call("myqueue", &mut msg(), &job).await;

        assert!(matches!(outcome, Err(JobError::Failed(_))));
        assert_eq!(queue.counter("failed").await.unwrap(), 1);
        assert_eq!(queue.counter(&format!("failed:{day}")).await.unwrap(), 1);
        assert_eq!(queue.counter("processed").await.unwrap(), 0);
    }
}
