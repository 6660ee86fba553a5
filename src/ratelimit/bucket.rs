//! Sliding-window log bucket.

use std::collections::VecDeque;

use super::policy::Policy;

/// Per-group request history.
///
/// Holds the epoch-millisecond timestamp of every admitted request that is
/// still inside the window, oldest first, plus the cached reset time.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    timestamps: VecDeque<i64>,
    reset_time: i64,
}

impl Bucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop timestamps that fell out of the window ending at `now`.
    ///
    /// A bucket left empty gets a fresh reset time of `now + window`.
    pub fn cleanup(&mut self, now: i64, policy: &Policy) {
        let window = policy.window_millis();
        let window_start = now.saturating_sub(window);

        while let Some(&oldest) = self.timestamps.front() {
            if oldest <= window_start {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        if self.timestamps.is_empty() {
            self.reset_time = now.saturating_add(window);
        }
    }

    /// Record a request at `now` if the cleaned-up window has room.
    ///
    /// Must be called after [`Bucket::cleanup`] with the same `now`.
    /// Returns the remaining capacity on success.
    pub fn try_append(&mut self, now: i64, policy: &Policy) -> Option<u32> {
        let max = policy.max_requests as usize;
        if self.timestamps.len() >= max {
            return None;
        }

        self.timestamps.push_back(now);
        Some((max - self.timestamps.len()) as u32)
    }

    /// Remaining capacity under `policy`, without recording anything.
    pub fn remaining(&self, policy: &Policy) -> u32 {
        let used = u32::try_from(self.timestamps.len()).unwrap_or(u32::MAX);
        policy.max_requests.saturating_sub(used)
    }

    /// Epoch milliseconds at which the current window resets.
    pub fn reset_time(&self) -> i64 {
        self.reset_time
    }

    /// Number of requests currently recorded.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True when no request is recorded.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
