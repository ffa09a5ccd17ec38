//! The unit of work a manager runs for each message.

use std::future::Future;

use async_trait::async_trait;
use qwork_queue::Msg;

use crate::error::JobError;

pub type JobResult = Result<(), JobError>;

#[async_trait]
pub trait Job: Send + Sync {
    async fn perform(&self, msg: &Msg) -> JobResult;
}

/// Any `Fn(Msg) -> impl Future<Output = JobResult>` is a job.
#[async_trait]
impl<F, Fut> Job for F
where
    F: Fn(Msg) -> Fut + Send + Sync,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn perform(&self, msg: &Msg) -> JobResult {
        (self)(msg.clone()).await
    }
}
