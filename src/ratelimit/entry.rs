//! Per-key window state.

use chrono::{DateTime, Utc};

use super::policy::RateLimitPolicy;

/// Requests counted in the window that is currently open for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests observed in the current window
    pub count: u64,
    /// When the current window expires
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    /// Open a new, empty window starting at `now`.
    pub fn open(policy: &RateLimitPolicy, now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_reset_at: now + policy.window(),
        }
    }

    /// A window is expired once its reset time is at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_reset_at <= now
    }

    /// Count one request.
    pub fn increment(&mut self) -> u64 {
        self.count = self.count.saturating_add(1);
        self.count
    }
}
