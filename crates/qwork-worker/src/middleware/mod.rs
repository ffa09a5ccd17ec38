//! Ordered interceptor chain wrapped around every job.
//!
//! Interceptors run outermost first, in insertion order. Each one decides
//! whether to call [`Next::run`]; the innermost call runs the job itself.

mod logging;
mod retry;
mod stats;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::FutureExt;
use qwork_queue::{JobQueue, Msg};

use crate::error::JobError;
use crate::job::Job;

pub use logging::MiddlewareLogging;
pub use retry::{backoff_delay, MiddlewareRetry, DEFAULT_MAX_RETRIES};
pub use stats::MiddlewareStats;

/// `Ok(ack)` says whether the message may be acknowledged; `Err` carries
/// a job fault outward.
pub type JobOutcome = Result<bool, JobError>;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, queue: &str, msg: &mut Msg, next: Next<'_>) -> JobOutcome;
}

/// The remainder of the chain.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    job: &'a dyn Job,
}

impl<'a> Next<'a> {
    pub async fn run(self, queue: &str, msg: &mut Msg) -> JobOutcome {
        match self.rest.split_first() {
            Some((head, rest)) => {
                head.call(queue, msg, Next { rest, job: self.job }).await
            }
            None => perform(self.job, msg).await,
        }
    }
}

async fn perform(job: &dyn Job, msg: &Msg) -> JobOutcome {
    match AssertUnwindSafe(job.perform(msg)).catch_unwind().await {
        Ok(Ok(())) => Ok(true),
        Ok(Err(fault)) => Err(fault),
        Err(payload) => Err(JobError::from_panic(payload)),
    }
}

/// A shareable, appendable chain.
#[derive(Default)]
pub struct Middlewares {
    actions: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl Middlewares {
    pub fn new(actions: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            actions: RwLock::new(actions),
        }
    }

    /// Logging, retry, then stats.
    pub fn default_chain(queue: &JobQueue) -> Self {
        let actions: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(MiddlewareLogging),
            Arc::new(MiddlewareRetry::new(queue.clone())),
            Arc::new(MiddlewareStats::new(queue.clone())),
        ];
        Self::new(actions)
    }

    /// Add an interceptor to the end; in-flight invocations are unaffected.
    pub fn append(&self, action: Arc<dyn Middleware>) {
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// An independent chain holding the current members followed by `extras`.
    pub fn snapshot_with(&self, extras: &[Arc<dyn Middleware>]) -> Self {
        let mut actions = self.snapshot();
        actions.extend(extras.iter().cloned());
        Self::new(actions)
    }

    pub fn len(&self) -> usize {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the chain around `job`.
    pub async fn call(&self, queue: &str, msg: &mut Msg, job: &dyn Job) -> JobOutcome {
        let actions = self.snapshot();
        Next {
            rest: &actions,
            job,
        }
        .run(queue, msg)
        .await
    }
}

impl std::fmt::Debug for Middlewares {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middlewares")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::job::JobResult;
    use std::sync::Mutex;

    /// Records `"<name> enter"` / `"<name> leave"` around `next`.
    pub(crate) struct Recorder {
        pub name: &'static str,
        pub trace: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        pub(crate) fn new(
            name: &'static str,
            trace: &Arc<Mutex<Vec<String>>>,
        ) -> Arc<dyn Middleware> {
            Arc::new(Self {
                name,
                trace: Arc::clone(trace),
            })
        }
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn call(&self, queue: &str, msg: &mut Msg, next: Next<'_>) -> JobOutcome {
            self.trace.lock().unwrap().push(format!("{} enter", self.name));
            let outcome = next.run(queue, msg).await;
            self.trace.lock().unwrap().push(format!("{} leave", self.name));
            outcome
        }
    }

    fn msg() -> Msg {
        Msg::parse(r#"{"jid":"1","class":"Test","args":[]}"#).unwrap()
    }

    #[tokio::test]
    async fn test_chain_runs_in_insertion_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = Middlewares::new(vec![Recorder::new("m1", &trace)]);
        chain.append(Recorder::new("m2", &trace));

        let job_trace = Arc::clone(&trace);
        let job = move |_msg: Msg| {
            let trace = Arc::clone(&job_trace);
            async move {
                trace.lock().unwrap().push("job".to_string());
                JobResult::Ok(())
            }
        };

        let outcome = chain.call("default", &mut msg(), &job).await;

        assert!(matches!(outcome, Ok(true)));
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["m1 enter", "m2 enter", "job", "m2 leave", "m1 leave"]
        );
    }

    #[tokio::test]
    async fn test_job_fault_propagates_through_chain() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = Middlewares::new(vec![Recorder::new("m1", &trace)]);
        let job = |_msg: Msg| async { JobResult::Err(JobError::failed("boom")) };

        let outcome = chain.call("default", &mut msg(), &job).await;

        assert!(matches!(outcome, Err(JobError::Failed(ref m)) if m == "boom"));
        assert_eq!(*trace.lock().unwrap(), vec!["m1 enter", "m1 leave"]);
    }

    #[tokio::test]
    async fn test_panic_becomes_fault() {
        let chain = Middlewares::default();
        let job = |_msg: Msg| async {
            if true {
                panic!("AHHHH");
            }
            JobResult::Ok(())
        };

        let outcome = chain.call("default", &mut msg(), &job).await;

        match outcome {
            Err(JobError::Panicked(message)) => assert_eq!(message, "AHHHH"),
            other => panic!("expected panic fault, got {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_with_is_independent() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let base = Middlewares::new(vec![Recorder::new("m1", &trace)]);
        let derived = base.snapshot_with(&[Recorder::new("extra", &trace)]);

        base.append(Recorder::new("m2", &trace));

        assert_eq!(base.len(), 2);
        assert_eq!(derived.len(), 2);
        assert!(!derived.is_empty());
    }
}
