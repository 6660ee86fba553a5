//! Keyed registry of sliding-window buckets.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use super::bucket::Bucket;
use super::clock::{Clock, SystemClock};
use super::policy::Policy;

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the window after this decision
    pub remaining: u32,
    /// Epoch milliseconds at which the window resets
    pub reset_time_millis: i64,
    /// The group the decision was made for
    pub group: String,
}

/// Sliding-window log store, one bucket per group.
///
/// This struct is thread-safe and can be shared across multiple tasks. The
/// cleanup, compare and append steps of [`RateLimitStore::try_consume`] run
/// under the bucket's shard lock, so concurrent callers of the same group
/// never lose updates.
#[derive(Debug)]
pub struct RateLimitStore {
    /// Buckets indexed by group key
    buckets: DashMap<String, Bucket>,
    /// Time source for window math
    clock: Arc<dyn Clock>,
}

impl RateLimitStore {
    /// Create a store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    /// The clock this store reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Check the group's window and record the request if it fits.
    pub fn try_consume(&self, group: &str, policy: &Policy) -> RateLimitDecision {
        let now = self.clock.now_millis();

        trace!(
            group = group,
            max_requests = policy.max_requests,
            window_seconds = policy.window_seconds,
            "Checking rate limit"
        );

        if let Some(mut bucket) = self.buckets.get_mut(group) {
            return Self::consume(&mut bucket, group, now, policy);
        }

        let mut bucket = self.buckets.entry(group.to_string()).or_insert_with(|| {
            debug!(group = group, "Creating new rate limit bucket");
            Bucket::new()
        });
        Self::consume(&mut bucket, group, now, policy)
    }

    fn consume(bucket: &mut Bucket, group: &str, now: i64, policy: &Policy) -> RateLimitDecision {
        bucket.cleanup(now, policy);

        match bucket.try_append(now, policy) {
            Some(remaining) => RateLimitDecision {
                allowed: true,
                remaining,
                reset_time_millis: bucket.reset_time(),
                group: group.to_string(),
            },
            None => {
                debug!(
                    group = group,
                    in_window = bucket.len(),
                    reset_time_millis = bucket.reset_time(),
                    "Rate limit exceeded"
                );
                RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_time_millis: bucket.reset_time(),
                    group: group.to_string(),
                }
            }
        }
    }

    /// Remaining capacity for a group, without consuming a slot.
    ///
    /// An unseen group reports the full capacity and is not created.
    pub fn peek_remaining(&self, group: &str, policy: &Policy) -> u32 {
        let now = self.clock.now_millis();
        match self.buckets.get_mut(group) {
            Some(mut bucket) => {
                bucket.cleanup(now, policy);
                bucket.remaining(policy)
            }
            None => policy.max_requests,
        }
    }

    /// Reset time for a group, without consuming a slot.
    ///
    /// An unseen group reports `now + window`.
    pub fn peek_reset_time(&self, group: &str, policy: &Policy) -> i64 {
        let now = self.clock.now_millis();
        match self.buckets.get_mut(group) {
            Some(mut bucket) => {
                bucket.cleanup(now, policy);
                bucket.reset_time()
            }
            None => now.saturating_add(policy.window_millis()),
        }
    }

    /// Forget a group's history. Returns whether a bucket existed.
    pub fn clear(&self, group: &str) -> bool {
        self.buckets.remove(group).is_some()
    }

    /// Forget every group's history.
    pub fn clear_all(&self) {
        self.buckets.clear();
    }

    /// Get the number of active buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Snapshot of the groups that currently own a bucket, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        groups.sort();
        groups
    }
}

impl Default for RateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::MockClock;
    use std::time::Duration;

    fn store_at(start: i64) -> (RateLimitStore, MockClock) {
        let clock = MockClock::new(start);
        (RateLimitStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_store_creation() {
        let store = RateLimitStore::new();
        assert_eq!(store.bucket_count(), 0);
    }

    #[test]
    fn test_try_consume_until_exhausted() {
        let (store, _clock) = store_at(10_000);
        let policy = Policy::new(2, 1.0).unwrap();

        let first = store.try_consume("global", &policy);
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.reset_time_millis, 11_000);

        let second = store.try_consume("global", &policy);
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = store.try_consume("global", &policy);
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert_eq!(third.reset_time_millis, 11_000);
        assert_eq!(third.group, "global");
    }

    #[test]
    fn test_window_expiry_restores_capacity() {
        let (store, clock) = store_at(0);
        let policy = Policy::new(1, 1.0).unwrap();

        assert!(store.try_consume("global", &policy).allowed);
        assert!(!store.try_consume("global", &policy).allowed);

        clock.advance(Duration::from_millis(1_000));
        let decision = store.try_consume("global", &policy);
        assert!(decision.allowed);
        assert_eq!(decision.reset_time_millis, 2_000);
    }

    #[test]
    fn test_zero_capacity_always_denies() {
        let (store, _clock) = store_at(0);
        let policy = Policy::new(0, 60.0).unwrap();

        for _ in 0..3 {
            assert!(!store.try_consume("global", &policy).allowed);
        }
    }

    #[test]
    fn test_groups_are_independent() {
        let (store, _clock) = store_at(0);
        let policy = Policy::new(1, 1.0).unwrap();

        assert!(store.try_consume("a.com", &policy).allowed);
        assert!(!store.try_consume("a.com", &policy).allowed);
        assert!(store.try_consume("b.com", &policy).allowed);
        assert_eq!(store.groups(), vec!["a.com".to_string(), "b.com".to_string()]);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let (store, _clock) = store_at(0);
        let policy = Policy::new(3, 5.0).unwrap();

        assert_eq!(store.peek_remaining("global", &policy), 3);
        assert_eq!(store.peek_reset_time("global", &policy), 5_000);
        assert_eq!(store.bucket_count(), 0);

        store.try_consume("global", &policy);
        assert_eq!(store.peek_remaining("global", &policy), 2);
        assert_eq!(store.peek_remaining("global", &policy), 2);
    }

    #[test]
    fn test_peek_applies_cleanup() {
        let (store, clock) = store_at(0);
        let policy = Policy::new(2, 1.0).unwrap();

        store.try_consume("global", &policy);
        store.try_consume("global", &policy);
        assert_eq!(store.peek_remaining("global", &policy), 0);

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.peek_remaining("global", &policy), 2);
        assert_eq!(store.peek_reset_time("global", &policy), 3_000);
    }

    #[test]
    fn test_clear_counters() {
        let (store, _clock) = store_at(0);
        let policy = Policy::new(1, 60.0).unwrap();

        store.try_consume("a", &policy);
        store.try_consume("b", &policy);
        assert_eq!(store.bucket_count(), 2);

        assert!(store.clear("a"));
        assert!(!store.clear("a"));
        assert!(store.try_consume("a", &policy).allowed);

        store.clear_all();
        assert_eq!(store.bucket_count(), 0);
    }

    #[test]
    fn test_concurrent_consumers_never_overshoot() {
        let (store, _clock) = store_at(0);
        let store = Arc::new(store);
        let policy = Policy::new(500, 60.0).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|_| store.try_consume("shared", &policy).allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 500);
        assert_eq!(store.peek_remaining("shared", &policy), 0);
    }
}
