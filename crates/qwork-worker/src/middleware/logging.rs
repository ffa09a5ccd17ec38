use std::time::Instant;

use async_trait::async_trait;
use qwork_queue::Msg;
use tracing::Instrument;

use super::{JobOutcome, Middleware, Next};
use crate::logging::JobLogger;

/// Logs start, completion and failure of every job inside a `job` span.
pub struct MiddlewareLogging;

#[async_trait]
impl Middleware for MiddlewareLogging {
    async fn call(&self, queue: &str, msg: &mut Msg, next: Next<'_>) -> JobOutcome {
        let logger = JobLogger::new(queue, msg);
        let span = logger.create_span();

        async {
            let started = Instant::now();
            logger.log_start();

            let outcome = next.run(queue, msg).await;
            match &outcome {
                Ok(_) => logger.log_completion(started.elapsed()),
                Err(fault) => logger.log_failure(started.elapsed(), fault),
            }
            outcome
        }
        .instrument(span)
        .await
    }
}
