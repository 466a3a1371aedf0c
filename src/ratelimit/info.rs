//! Results returned by the store.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Outcome of a check or status lookup for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Budget per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window resets
    pub reset: DateTime<Utc>,
    /// Seconds to wait before retrying. Present when the request should be refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateLimitInfo {
    /// Whether the caller should refuse the request.
    pub fn is_exceeded(&self) -> bool {
        self.retry_after.is_some()
    }

    /// Standard rate limit response headers, lowercase names.
    ///
    /// The reset time is rendered as RFC 3339 in UTC with millisecond precision.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (
                HEADER_RESET,
                self.reset.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ];
        if let Some(retry_after) = self.retry_after {
            headers.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        headers
    }
}

/// Diagnostic snapshot of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatistics {
    /// Entries whose window is still open
    pub active_entries: usize,
    /// Sum of counts across open windows only
    pub total_requests: u64,
    /// All entries, including expired ones the sweep has not removed yet
    pub total_keys: usize,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_headers_without_retry_after() {
        let info = RateLimitInfo {
            limit: 100,
            remaining: 42,
            reset: Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
            retry_after: None,
        };

        assert!(!info.is_exceeded());
        assert_eq!(
            info.headers(),
            vec![
                (HEADER_LIMIT, "100".to_string()),
                (HEADER_REMAINING, "42".to_string()),
                (HEADER_RESET, "2026-03-04T05:06:07.000Z".to_string()),
            ]
        );
    }

    #[test]
    fn test_headers_with_retry_after() {
        let info = RateLimitInfo {
            limit: 3,
            remaining: 0,
            reset: Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
            retry_after: Some(12),
        };

        assert!(info.is_exceeded());
        let headers = info.headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[3], (HEADER_RETRY_AFTER, "12".to_string()));
    }

    #[test]
    fn test_statistics_serialize_camel_case() {
        let stats = RateLimitStatistics {
            active_entries: 1,
            total_requests: 7,
            total_keys: 2,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["activeEntries"], 1);
        assert_eq!(json["totalRequests"], 7);
        assert_eq!(json["totalKeys"], 2);
    }
}
