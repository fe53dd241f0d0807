use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared, one-way cancellation signal.
///
/// One token is cloned into every stage of a pipeline run. Raising it is a
/// broadcast: each drive loop observes the flag within one polling interval
/// and stops before its next blocking queue operation. An in-flight
/// transform is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal; idempotent, never reverts
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether the signal has been raised
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
