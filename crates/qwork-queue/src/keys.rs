//! Namespaced key schema.
//!
//! Producers, fetchers and pollers must agree on every key below; all of
//! them build keys through [`Keys`].

/// Sorted set holding failed jobs awaiting retry.
pub const RETRY_KEY: &str = "retry";

/// Sorted set holding jobs delayed until a future time.
pub const SCHEDULED_JOBS_KEY: &str = "schedule";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    namespace: String,
}

impl Keys {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: Self::normalize_namespace(namespace),
        }
    }

    /// `""` stays empty, `"prod"` becomes `"prod:"`.
    pub fn normalize_namespace(namespace: &str) -> String {
        if namespace.is_empty() || namespace.ends_with(':') {
            namespace.to_string()
        } else {
            format!("{namespace}:")
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Prefix an arbitrary key with the namespace.
    pub fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Set of known queue names.
    pub fn queues(&self) -> String {
        self.namespaced("queues")
    }

    /// Pending-jobs list for `queue` (unnamespaced name).
    pub fn queue(&self, queue: &str) -> String {
        format!("{}queue:{}", self.namespace, queue)
    }

    /// Claimed-but-unacknowledged list for `queue` owned by `process_id`.
    pub fn inprogress(&self, queue: &str, process_id: &str) -> String {
        format!("{}:{}:inprogress", self.queue(queue), process_id)
    }

    pub fn retry(&self) -> String {
        self.namespaced(RETRY_KEY)
    }

    pub fn scheduled(&self) -> String {
        self.namespaced(SCHEDULED_JOBS_KEY)
    }

    /// Lifetime counter, e.g. `stat:processed`.
    pub fn stat(&self, metric: &str) -> String {
        format!("{}stat:{}", self.namespace, metric)
    }

    /// Daily counter, e.g. `stat:processed:2024-01-31`.
    pub fn daily_stat(&self, metric: &str, day: &str) -> String {
        format!("{}:{}", self.stat(metric), day)
    }

    /// Remove the namespace from a stored queue name, if present.
    pub fn strip<'a>(&self, queue: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            return queue;
        }
        queue.strip_prefix(self.namespace.as_str()).unwrap_or(queue)
    }
}
