//! In-memory fixed-window rate limit store.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::entry::RateLimitEntry;
use super::info::{RateLimitInfo, RateLimitStatistics};
use super::policy::RateLimitPolicy;

/// Per-key fixed-window request counters.
///
/// Entries live in a `DashMap`. A check holds the shard lock of its key for
/// the whole read, reset and increment sequence, so concurrent checks on one
/// key never lose counts. Each process keeps its own store; budgets are not
/// shared across processes.
///
/// Methods without a suffix read the system clock. The `*_at` variants take
/// the current time explicitly.
#[derive(Debug, Default)]
pub struct RateLimitStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimitStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Count a request for `key` and report whether it fits the policy.
    ///
    /// The request is counted even when it is over budget.
    pub fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitInfo {
        self.check_at(key, policy, Utc::now())
    }

    pub fn check_at(&self, key: &str, policy: &RateLimitPolicy, now: DateTime<Utc>) -> RateLimitInfo {
        let (count, reset) = {
            let mut entry = match self.entries.entry(key.to_string()) {
                Entry::Occupied(occupied) => {
                    let mut entry = occupied.into_ref();
                    if entry.is_expired(now) {
                        debug!(key = %key, "Rate limit window expired, opening a new one");
                        *entry = RateLimitEntry::open(policy, now);
                    }
                    entry
                }
                Entry::Vacant(vacant) => {
                    debug!(
                        key = %key,
                        window_ms = policy.window_duration_ms(),
                        limit = policy.max_requests(),
                        "Creating new rate limit entry"
                    );
                    vacant.insert(RateLimitEntry::open(policy, now))
                }
            };

            let count = entry.increment();
            (count, entry.window_reset_at)
        };

        let limit = policy.max_requests();
        let retry_after = if count > limit {
            debug!(key = %key, count = count, limit = limit, "Rate limit exceeded");
            Some(seconds_until(reset, now))
        } else {
            None
        };

        trace!(key = %key, count = count, limit = limit, "Checked rate limit");

        RateLimitInfo {
            limit,
            remaining: limit.saturating_sub(count),
            reset,
            retry_after,
        }
    }

    /// Count a request and return `true` if it exhausted and exceeded the budget.
    pub fn is_rate_limited(&self, key: &str, policy: &RateLimitPolicy) -> bool {
        self.is_rate_limited_at(key, policy, Utc::now())
    }

    pub fn is_rate_limited_at(&self, key: &str, policy: &RateLimitPolicy, now: DateTime<Utc>) -> bool {
        let info = self.check_at(key, policy, now);
        info.remaining == 0 && info.retry_after.is_some()
    }

    /// Report the state of `key` without counting, creating or resetting anything.
    ///
    /// Unlike [`check`](Self::check), `retry_after` is present as soon as the
    /// count has reached the budget, since the next request would be refused.
    pub fn status(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitInfo {
        self.status_at(key, policy, Utc::now())
    }

    pub fn status_at(&self, key: &str, policy: &RateLimitPolicy, now: DateTime<Utc>) -> RateLimitInfo {
        let limit = policy.max_requests();

        let open = self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| (entry.count, entry.window_reset_at));

        match open {
            Some((count, reset)) => RateLimitInfo {
                limit,
                remaining: limit.saturating_sub(count),
                reset,
                retry_after: (count >= limit).then(|| seconds_until(reset, now)),
            },
            None => RateLimitInfo {
                limit,
                remaining: limit,
                reset: now + policy.window(),
                retry_after: None,
            },
        }
    }

    /// Forget `key`. Returns whether an entry was present.
    pub fn reset(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            debug!(key = %key, "Rate limit entry reset");
        }
        removed
    }

    pub fn statistics(&self) -> RateLimitStatistics {
        self.statistics_at(Utc::now())
    }

    pub fn statistics_at(&self, now: DateTime<Utc>) -> RateLimitStatistics {
        let mut active_entries = 0;
        let mut total_requests: u64 = 0;
        let mut total_keys = 0;

        for entry in self.entries.iter() {
            total_keys += 1;
            if !entry.is_expired(now) {
                active_entries += 1;
                total_requests = total_requests.saturating_add(entry.count);
            }
        }

        RateLimitStatistics {
            active_entries,
            total_requests,
            total_keys,
            timestamp: now,
        }
    }

    /// Remove every entry whose window has expired. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whole seconds from `now` until `reset`, rounded up.
fn seconds_until(reset: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn at(millis: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(millis)
    }

    fn policy(window_ms: u64, max: u64) -> RateLimitPolicy {
        RateLimitPolicy::new(window_ms, max).unwrap()
    }

    #[test]
    fn test_fresh_key() {
        let store = RateLimitStore::new();
        let info = store.check_at("client", &policy(1_000, 3), t0());

        assert_eq!(info.limit, 3);
        assert_eq!(info.remaining, 2);
        assert_eq!(info.reset, at(1_000));
        assert_eq!(info.retry_after, None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_budget_exhaustion_boundary() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 3);

        let remaining: Vec<u64> = (0..3)
            .map(|i| {
                let info = store.check_at("client", &p, at(i * 10));
                assert_eq!(info.retry_after, None);
                info.remaining
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        // Fourth request in the same window: count 4 > 3
        let info = store.check_at("client", &p, at(100));
        assert_eq!(info.remaining, 0);
        assert_eq!(info.retry_after, Some(1));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let store = RateLimitStore::new();
        let p = policy(10_000, 1);

        store.check_at("client", &p, t0());
        let info = store.check_at("client", &p, at(1));
        // 9999 ms left
        assert_eq!(info.retry_after, Some(10));

        let info = store.check_at("client", &p, at(8_000));
        assert_eq!(info.retry_after, Some(2));

        let info = store.check_at("client", &p, at(9_001));
        assert_eq!(info.retry_after, Some(1));
    }

    #[test]
    fn test_over_budget_requests_are_counted() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 2);

        for _ in 0..5 {
            store.check_at("client", &p, t0());
        }

        assert_eq!(store.statistics_at(t0()).total_requests, 5);
    }

    #[test]
    fn test_window_rollover() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 3);

        for _ in 0..4 {
            store.check_at("client", &p, t0());
        }

        // Reset time is inclusive: at exactly t0 + window the old window is gone
        let info = store.check_at("client", &p, at(1_000));
        assert_eq!(info.remaining, 2);
        assert_eq!(info.retry_after, None);
        assert_eq!(info.reset, at(2_000));

        let info = store.check_at("client", &p, at(2_750));
        assert_eq!(info.remaining, 2);
        assert_eq!(info.reset, at(3_750));
    }

    #[test]
    fn test_reset_time_fixed_within_window() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 10);

        let first = store.check_at("client", &p, t0());
        let second = store.check_at("client", &p, at(600));
        assert_eq!(first.reset, second.reset);
    }

    #[test]
    fn test_status_never_mutates() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 5);

        for i in 0..10 {
            let info = store.status_at("client", &p, at(i));
            assert_eq!(info.remaining, 5);
            assert_eq!(info.reset, at(i + 1_000));
            assert_eq!(info.retry_after, None);
        }
        assert!(store.is_empty());

        let info = store.check_at("client", &p, at(10));
        assert_eq!(info.remaining, 4);
    }

    #[test]
    fn test_status_of_open_window() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 5);

        store.check_at("client", &p, t0());
        store.check_at("client", &p, t0());

        let info = store.status_at("client", &p, at(500));
        assert_eq!(info.remaining, 3);
        assert_eq!(info.reset, at(1_000));
        assert_eq!(info.retry_after, None);

        // Peeking does not count
        assert_eq!(store.status_at("client", &p, at(500)).remaining, 3);
    }

    #[test]
    fn test_status_of_expired_window_is_fresh() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 5);

        for _ in 0..6 {
            store.check_at("client", &p, t0());
        }

        let info = store.status_at("client", &p, at(1_500));
        assert_eq!(info.remaining, 5);
        assert_eq!(info.reset, at(2_500));
        assert_eq!(info.retry_after, None);
        // The expired entry is left for the sweep
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_check_and_status_disagree_at_the_boundary() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 3);

        for _ in 0..2 {
            store.check_at("client", &p, t0());
        }

        // Third request reaches the budget exactly: check allows it...
        let checked = store.check_at("client", &p, t0());
        assert_eq!(checked.remaining, 0);
        assert_eq!(checked.retry_after, None);

        // ...while status already reports a retry-after, since count >= limit.
        let status = store.status_at("client", &p, at(250));
        assert_eq!(status.remaining, 0);
        assert_eq!(status.retry_after, Some(1));
    }

    #[test]
    fn test_status_past_the_limit() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 3);

        for _ in 0..4 {
            store.check_at("client", &p, t0());
        }

        let status = store.status_at("client", &p, at(400));
        assert_eq!(status.limit, 3);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.reset, at(1_000));
        assert_eq!(status.retry_after, Some(1));
        assert!(status.is_exceeded());

        // Still four requests on record
        assert_eq!(store.statistics_at(at(400)).total_requests, 4);
    }

    #[test]
    fn test_is_rate_limited() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 2);

        assert!(!store.is_rate_limited_at("client", &p, t0()));
        assert!(!store.is_rate_limited_at("client", &p, t0()));
        assert!(store.is_rate_limited_at("client", &p, t0()));
        assert!(store.is_rate_limited_at("client", &p, t0()));

        // It counts, like check
        assert_eq!(store.statistics_at(t0()).total_requests, 4);
    }

    #[test]
    fn test_reset_clears_state() {
        let store = RateLimitStore::new();
        let p = policy(60_000, 5);

        store.check_at("client", &p, t0());
        store.check_at("client", &p, t0());

        assert!(store.reset("client"));
        assert!(store.is_empty());

        let info = store.check_at("client", &p, at(10));
        assert_eq!(info.remaining, 4);
        assert_eq!(info.reset, at(60_010));
    }

    #[test]
    fn test_reset_missing_key_is_noop() {
        let store = RateLimitStore::new();
        assert!(!store.reset("nobody"));
    }

    #[test]
    fn test_statistics() {
        let store = RateLimitStore::new();

        store.check_at("short-lived", &policy(1_000, 10), t0());
        store.check_at("short-lived", &policy(1_000, 10), t0());
        for _ in 0..3 {
            store.check_at("long-lived", &policy(60_000, 10), t0());
        }

        let stats = store.statistics_at(at(500));
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.active_entries, 2);
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.timestamp, at(500));

        let stats = store.statistics_at(at(1_000));
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.active_entries, 1);
        assert_eq!(stats.total_requests, 3);
    }

    #[test]
    fn test_sweep_removes_expired_only() {
        let store = RateLimitStore::new();

        store.check_at("expiring", &policy(1_000, 10), t0());
        store.check_at("open", &policy(60_000, 10), t0());
        store.check_at("open", &policy(60_000, 10), t0());

        let before = store.statistics_at(at(5_000));
        assert_eq!(before.total_keys, 2);

        assert_eq!(store.sweep_expired_at(at(5_000)), 1);

        let after = store.statistics_at(at(5_000));
        assert_eq!(after.total_keys, before.total_keys - 1);
        assert_eq!(after.active_entries, 1);
        assert_eq!(after.total_requests, 2);

        // The open key kept its count
        let info = store.check_at("open", &policy(60_000, 10), at(5_000));
        assert_eq!(info.remaining, 7);
    }

    #[test]
    fn test_sweep_empty_store() {
        let store = RateLimitStore::new();
        assert_eq!(store.sweep_expired_at(t0()), 0);
    }

    #[test]
    fn test_independent_keys() {
        let store = RateLimitStore::new();
        let p = policy(1_000, 3);

        store.check_at("A", &p, t0());
        store.check_at("A", &p, t0());
        let b = store.check_at("B", &p, at(400));
        let a = store.check_at("A", &p, at(400));

        assert_eq!(a.remaining, 0);
        assert_eq!(a.reset, at(1_000));
        assert_eq!(b.remaining, 2);
        assert_eq!(b.reset, at(1_400));

        store.reset("A");
        assert_eq!(store.status_at("B", &p, at(400)).remaining, 2);
    }

    #[test]
    fn test_concurrent_checks_lose_no_counts() {
        let store = Arc::new(RateLimitStore::new());
        let p = policy(60_000, 1_000_000);
        let now = t0();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let store = store.clone();
                scope.spawn(move || {
                    for _ in 0..250 {
                        store.check_at("shared", &p, now);
                    }
                });
            }
        });

        let info = store.status_at("shared", &p, now);
        assert_eq!(info.remaining, 1_000_000 - 2_000);
    }
}
