//! Log suppression for background loops that hit the store repeatedly.

use tracing::{debug, warn};

/// Counts consecutive failures of a repeating operation.
///
/// The first `max_logged` failures in a row are reported; after that a
/// single suppression notice is emitted and the rest stay quiet until the
/// operation succeeds again.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive: u32,
    max_logged: u32,
}

impl FailureTracker {
    pub fn new(max_logged: u32) -> Self {
        Self {
            consecutive: 0,
            max_logged,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > self.max_logged {
            debug!(
                failures = self.consecutive,
                "Recovered after suppressed failures"
            );
        }
        self.consecutive = 0;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);

        if self.consecutive == self.max_logged.saturating_add(1) {
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged
            );
        }
        self.consecutive <= self.max_logged
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive
    }
}
