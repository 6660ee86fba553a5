//! Wall-clock sources for window bookkeeping.
//!
//! Buckets store epoch milliseconds so that reset times can be reported
//! directly in `RateLimit-Reset` and `Retry-After` headers.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// System clock backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same underlying time, so advancing one advances all.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<i64>>,
}

impl MockClock {
    /// Create a mock clock starting at `start_millis`.
    pub fn new(start_millis: i64) -> Self {
        Self {
            current: Arc::new(Mutex::new(start_millis)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, duration: Duration) {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        let mut current = self.current.lock();
        *current = current.saturating_add(millis);
    }

    /// Jump to an absolute time.
    pub fn set(&self, millis: i64) {
        *self.current.lock() = millis;
    }
}

impl Clock for MockClock {
    fn now_millis(&self) -> i64 {
        *self.current.lock()
    }
}
