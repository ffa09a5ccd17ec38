//! Failed-job retry with exponential backoff and jitter.

use async_trait::async_trait;
use chrono::Utc;
use qwork_queue::time::{format_timestamp, to_seconds};
use qwork_queue::{JobQueue, Msg, RetryOptions};
use rand::Rng;
use tracing::{error, info, warn};

use super::{JobOutcome, Middleware, Next};
use crate::error::JobError;

/// Ceiling used when a message sets neither an integer `retry` nor `retry_max`.
pub const DEFAULT_MAX_RETRIES: i64 = 25;

/// Seconds to wait before retry number `retry_count`.
///
/// `min_delay + retry_count^exp + jitter`, clamped to `max_delay` when that
/// is positive.
pub fn backoff_delay(options: &RetryOptions, retry_count: i64, jitter: u64) -> f64 {
    let delay = options.min_delay as f64
        + (retry_count as f64).powf(f64::from(options.exp))
        + jitter as f64;

    if options.max_delay > 0 {
        delay.min(options.max_delay as f64)
    } else {
        delay
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RetryPlan {
    Disabled,
    Exhausted { count: i64, ceiling: i64 },
    Retry { count: i64, delay: f64 },
}

fn plan(msg: &Msg) -> RetryPlan {
    let ceiling_override = match msg.get_bool("retry") {
        Ok(true) => None,
        Ok(false) => return RetryPlan::Disabled,
        Err(_) => match msg.get_i64("retry") {
            Ok(n) if n > 0 => Some(n),
            _ => return RetryPlan::Disabled,
        },
    };

    let count = msg.get_i64("retry_count").unwrap_or(0).max(0) + 1;
    let ceiling = ceiling_override
        .or_else(|| msg.get_i64("retry_max").ok().filter(|n| *n > 0))
        .unwrap_or(DEFAULT_MAX_RETRIES);

    if count > ceiling {
        return RetryPlan::Exhausted { count, ceiling };
    }

    let options = retry_options(msg);
    let jitter = rand::rng().random_range(0..=options.max_rand);
    RetryPlan::Retry {
        count,
        delay: backoff_delay(&options, count, jitter),
    }
}

fn retry_options(msg: &Msg) -> RetryOptions {
    let Ok(value) = msg.get("retry_options") else {
        return RetryOptions::default();
    };

    serde_json::from_value(value.clone()).unwrap_or_else(|e| {
        warn!(
            jid = msg.jid().unwrap_or_default(),
            "Ignoring malformed retry_options: {}", e
        );
        RetryOptions::default()
    })
}

/// Catches job faults and schedules the message on the retry set.
///
/// Faults never pass this interceptor. A job that is retried or dropped
/// resolves to an acknowledgement; one whose retry could not be recorded
/// is left unacknowledged so it is recovered from the in-progress list.
pub struct MiddlewareRetry {
    queue: JobQueue,
}

impl MiddlewareRetry {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    async fn retry_or_drop(&self, queue: &str, msg: &mut Msg, fault: &JobError) -> bool {
        let jid = msg.jid().unwrap_or_default().to_string();

        let (count, delay) = match plan(msg) {
            RetryPlan::Disabled => {
                warn!(queue, jid = %jid, "Job failed with retries disabled: {}", fault);
                return true;
            }
            RetryPlan::Exhausted { count, ceiling } => {
                warn!(
                    queue,
                    jid = %jid,
                    retry_count = count,
                    ceiling,
                    "Retries exhausted, dropping job: {}", fault
                );
                return true;
            }
            RetryPlan::Retry { count, delay } => (count, delay),
        };

        let now = Utc::now();
        if msg.contains("failed_at") {
            msg.set("retried_at", format_timestamp(now));
        } else {
            msg.set("failed_at", format_timestamp(now));
        }
        msg.set("error_message", fault.to_string());
        if fault.class().is_empty() {
            msg.remove("error_class");
        } else {
            msg.set("error_class", fault.class());
        }
        match fault.backtrace() {
            Some(trace) => msg.set("error_backtrace", trace),
            None => {
                msg.remove("error_backtrace");
            }
        }
        msg.set("queue", self.queue.keys().strip(queue));
        msg.set("retry_count", count);

        let score = to_seconds(now) + delay;
        match self
            .queue
            .store()
            .zadd(&self.queue.keys().retry(), score, &msg.to_json())
            .await
        {
            Ok(()) => {
                info!(
                    queue,
                    jid = %jid,
                    retry_count = count,
                    delay_secs = delay,
                    "Scheduled retry"
                );
                true
            }
            Err(e) => {
                error!(queue, jid = %jid, "Failed to schedule retry: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Middleware for MiddlewareRetry {
    async fn call(&self, queue: &str, msg: &mut Msg, next: Next<'_>) -> JobOutcome {
        match next.run(queue, msg).await {
            Ok(ack) => Ok(ack),
            Err(fault) => Ok(self.retry_or_drop(queue, msg, &fault).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobResult;
    use crate::middleware::Middlewares;
    use crate::testing::memory_queue;
    use qwork_queue::time::now_seconds;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn failing(_msg: Msg) -> std::future::Ready<JobResult> {
        let fault = JobError::raised("Timeout", "AHHHH").with_backtrace("at job.rs:1");
        std::future::ready(Err(fault))
    }

    fn chain(queue: &JobQueue) -> Middlewares {
        let retry: Arc<dyn Middleware> = Arc::new(MiddlewareRetry::new(queue.clone()));
        Middlewares::new(vec![retry])
    }

    async fn run_failing(queue: &JobQueue, fields: Value) -> JobOutcome {
        let mut msg = Msg::from_value(fields).unwrap();
        chain(queue).call("myqueue", &mut msg, &failing).await
    }

    fn options(exp: u32, min_delay: u64, max_delay: u64) -> RetryOptions {
        RetryOptions {
            exp,
            min_delay,
            max_delay,
            max_rand: 0,
        }
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(&options(2, 0, 0), 3, 0), 9.0);

        let opts = options(2, 1200, 0);
        assert_eq!(backoff_delay(&opts, 1, 0), 1201.0);
        assert_eq!(backoff_delay(&opts, 1, 7), 1208.0);

        assert_eq!(backoff_delay(&options(2, 1200, 60), 1, 0), 60.0);
    }

    #[test]
    fn test_plan_ceilings() {
        let msg = Msg::parse(r#"{"retry":true,"retry_count":24}"#).unwrap();
        assert!(matches!(plan(&msg), RetryPlan::Retry { count: 25, .. }));

        let msg = Msg::parse(r#"{"retry":true,"retry_count":25}"#).unwrap();
        assert_eq!(
            plan(&msg),
            RetryPlan::Exhausted {
                count: 26,
                ceiling: 25
            }
        );

        let msg = Msg::parse(r#"{"retry":true,"retry_max":3,"retry_count":3}"#).unwrap();
        assert_eq!(plan(&msg), RetryPlan::Exhausted { count: 4, ceiling: 3 });

        let msg = Msg::parse(r#"{"retry":5,"retry_max":3,"retry_count":4}"#).unwrap();
        assert!(matches!(plan(&msg), RetryPlan::Retry { count: 5, .. }));

        let msg = Msg::parse(r#"{"retry":false}"#).unwrap();
        assert_eq!(plan(&msg), RetryPlan::Disabled);

        let msg = Msg::parse(r#"{"retry":0}"#).unwrap();
        assert_eq!(plan(&msg), RetryPlan::Disabled);

        let msg = Msg::parse(r#"{}"#).unwrap();
        assert_eq!(plan(&msg), RetryPlan::Disabled);
    }

    #[test]
    fn test_malformed_retry_options_use_defaults() {
        let msg = Msg::parse(r#"{"retry_options":"soon"}"#).unwrap();
        assert_eq!(retry_options(&msg), RetryOptions::default());

        let msg = Msg::parse(r#"{"retry_options":{"exp":2}}"#).unwrap();
        assert_eq!(
            retry_options(&msg),
            RetryOptions {
                exp: 2,
                ..RetryOptions::default()
            }
        );
    }

    #[tokio::test]
    async fn test_failed_job_is_scheduled_for_retry() {
        let queue = memory_queue();

        let outcome = run_failing(
            &queue,
            json!({"jid": "2", "class": "Mailer", "args": [], "retry": true}),
        )
        .await;

        assert!(matches!(outcome, Ok(true)));
        let retries = queue.retries().await.unwrap();
        assert_eq!(retries.len(), 1);

        let (msg, _) = &retries[0];
        assert_eq!(msg.get_str("queue").unwrap(), "myqueue");
        assert_eq!(msg.get_str("error_message").unwrap(), "AHHHH");
        assert_eq!(msg.get_str("error_class").unwrap(), "Timeout");
        assert_eq!(msg.get_str("error_backtrace").unwrap(), "at job.rs:1");
        assert_eq!(msg.get_i64("retry_count").unwrap(), 1);
        assert!(msg.get_str("failed_at").unwrap().ends_with(" UTC"));
        assert!(!msg.contains("retried_at"));
    }

    #[tokio::test]
    async fn test_retries_disabled_drops_job() {
        let queue = memory_queue();

        let outcome = run_failing(&queue, json!({"jid": "2", "class": "Mailer", "args": []})).await;

        assert!(matches!(outcome, Ok(true)));
        assert_eq!(queue.retry_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_job() {
        let queue = memory_queue();
        let job = |count: i64| {
            json!({"jid": "2", "args": [], "retry": true, "retry_max": 10, "retry_count": count})
        };

        run_failing(&queue, job(10)).await.unwrap();
        assert_eq!(queue.retry_len().await.unwrap(), 0);

        run_failing(&queue, job(9)).await.unwrap();
        assert_eq!(queue.retry_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retry_scores_follow_backoff() {
        let queue = memory_queue();
        let before = now_seconds();

        run_failing(
            &queue,
            json!({
                "jid": "2",
                "args": [],
                "retry": true,
                "retry_options": {"exp": 2, "min_delay": 1200, "max_rand": 0}
            }),
        )
        .await
        .unwrap();

        let (_, score) = queue.retries().await.unwrap()[0].clone();
        assert!(
            score >= before + 1201.0 && score < before + 1203.0,
            "score {score}"
        );
    }

    #[tokio::test]
    async fn test_retry_scores_follow_count_and_max_delay() {
        let queue = memory_queue();
        let before = now_seconds();

        run_failing(
            &queue,
            json!({
                "jid": "a",
                "args": [],
                "retry": true,
                "retry_count": 2,
                "retry_options": {"exp": 2, "min_delay": 0, "max_rand": 0}
            }),
        )
        .await
        .unwrap();
        run_failing(
            &queue,
            json!({
                "jid": "b",
                "args": [],
                "retry": true,
                "retry_options": {"exp": 2, "min_delay": 1200, "max_rand": 0, "max_delay": 600}
            }),
        )
        .await
        .unwrap();

        let scores: Vec<f64> = queue
            .retries()
            .await
            .unwrap()
            .into_iter()
            .map(|(_, score)| score)
            .collect();
        assert_eq!(scores.len(), 2);
        assert!(
            scores[0] >= before + 9.0 && scores[0] < before + 11.0,
            "score {}",
            scores[0]
        );
        assert!(
            scores[1] >= before + 600.0 && scores[1] < before + 602.0,
            "score {}",
            scores[1]
        );
    }

    #[tokio::test]
    async fn test_failure_metadata_comes_from_latest_fault() {
        let queue = memory_queue();
        let mut msg = Msg::from_value(json!({
            "jid": "2",
            "args": [],
            "retry": true,
            "retry_count": 1,
            "error_message": "first",
            "error_class": "Timeout",
            "error_backtrace": "at old.rs:1"
        }))
        .unwrap();
        let job = |_msg: Msg| async { JobResult::Err(JobError::failed("second")) };

        let outcome = chain(&queue).call("myqueue", &mut msg, &job).await;

        assert!(matches!(outcome, Ok(true)));
        let (stored, _) = queue.retries().await.unwrap()[0].clone();
        assert_eq!(stored.get_str("error_message").unwrap(), "second");
        assert!(!stored.contains("error_class"));
        assert!(!stored.contains("error_backtrace"));
    }

    #[tokio::test]
    async fn test_second_failure_sets_retried_at() {
        let queue = memory_queue();

        run_failing(
            &queue,
            json!({
                "jid": "2",
                "args": [],
                "retry": true,
                "retry_count": 1,
                "failed_at": "2024-01-01 00:00:00 UTC"
            }),
        )
        .await
        .unwrap();

        let (msg, _) = queue.retries().await.unwrap()[0].clone();
        assert_eq!(msg.get_str("failed_at").unwrap(), "2024-01-01 00:00:00 UTC");
        assert!(msg.get_str("retried_at").unwrap().ends_with(" UTC"));
        assert_eq!(msg.get_i64("retry_count").unwrap(), 2);
    }
}
