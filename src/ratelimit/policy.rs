//! Rate limit policies: a window length paired with a request budget.
//!
//! Policies are validated on construction and on deserialization, so the
//! store only ever sees positive windows and budgets.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{AyinelError, Result};

/// Longest window a policy may declare (365 days).
pub const MAX_WINDOW_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Separates the policy name from the client id in store keys.
/// Policy names may not contain it, so the first occurrence is always the boundary.
pub const KEY_SEPARATOR: char = ':';

/// Names accepted by [`NamedPolicy::preset`].
pub const PRESET_NAMES: [&str; 5] = ["global", "api", "short", "medium", "long"];

/// A fixed-window policy: at most `max_requests` per `window_duration_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPolicy")]
pub struct RateLimitPolicy {
    window_duration_ms: u64,
    max_requests: u64,
}

#[derive(Deserialize)]
struct RawPolicy {
    window_duration_ms: u64,
    max_requests: u64,
}

impl TryFrom<RawPolicy> for RateLimitPolicy {
    type Error = AyinelError;

    fn try_from(raw: RawPolicy) -> Result<Self> {
        RateLimitPolicy::new(raw.window_duration_ms, raw.max_requests)
    }
}

impl RateLimitPolicy {
    /// Create a policy, rejecting zero values and windows above [`MAX_WINDOW_MS`].
    pub fn new(window_duration_ms: u64, max_requests: u64) -> Result<Self> {
        if window_duration_ms == 0 {
            return Err(AyinelError::InvalidPolicy(
                "window_duration_ms must be greater than zero".to_string(),
            ));
        }
        if window_duration_ms > MAX_WINDOW_MS {
            return Err(AyinelError::InvalidPolicy(format!(
                "window_duration_ms must not exceed {} (got {})",
                MAX_WINDOW_MS, window_duration_ms
            )));
        }
        if max_requests == 0 {
            return Err(AyinelError::InvalidPolicy(
                "max_requests must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            window_duration_ms,
            max_requests,
        })
    }

    /// 15 minute window, 100 requests. Used for site-wide limits.
    pub fn global() -> Self {
        Self {
            window_duration_ms: 900_000,
            max_requests: 100,
        }
    }

    /// One minute window, 100 requests.
    pub fn api() -> Self {
        Self {
            window_duration_ms: 60_000,
            max_requests: 100,
        }
    }

    pub fn window_duration_ms(&self) -> u64 {
        self.window_duration_ms
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// The window length as a chrono duration.
    pub fn window(&self) -> Duration {
        // Bounded by MAX_WINDOW_MS, so the cast cannot wrap.
        Duration::milliseconds(self.window_duration_ms as i64)
    }
}

/// A policy with a name, used to namespace store keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPolicy {
    /// Policy name, e.g. `global` or `short`
    pub name: String,
    /// Window and budget
    #[serde(flatten)]
    pub policy: RateLimitPolicy,
}

impl NamedPolicy {
    pub fn new(name: impl Into<String>, policy: RateLimitPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    /// A built-in policy by name, see [`PRESET_NAMES`].
    pub fn preset(name: &str) -> Option<NamedPolicy> {
        match name {
            "global" => Some(NamedPolicy::default()),
            "api" => Some(NamedPolicy::new("api", RateLimitPolicy::api())),
            _ => NamedPolicy::tiers().into_iter().find(|tier| tier.name == name),
        }
    }

    /// The three throttling tiers: 3 per second, 20 per 10 seconds, 100 per minute.
    pub fn tiers() -> Vec<NamedPolicy> {
        vec![
            NamedPolicy::new(
                "short",
                RateLimitPolicy {
                    window_duration_ms: 1_000,
                    max_requests: 3,
                },
            ),
            NamedPolicy::new(
                "medium",
                RateLimitPolicy {
                    window_duration_ms: 10_000,
                    max_requests: 20,
                },
            ),
            NamedPolicy::new(
                "long",
                RateLimitPolicy {
                    window_duration_ms: 60_000,
                    max_requests: 100,
                },
            ),
        ]
    }
}

/// Check that a policy name can safely prefix a store key.
pub fn validate_policy_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AyinelError::InvalidPolicy(
            "policy names must not be empty".to_string(),
        ));
    }
    if name.contains(KEY_SEPARATOR) {
        return Err(AyinelError::InvalidPolicy(format!(
            "policy name must not contain '{}': {}",
            KEY_SEPARATOR, name
        )));
    }
    Ok(())
}

/// Check a whole policy set: valid names, no duplicates.
pub fn validate_policies(policies: &[NamedPolicy]) -> Result<()> {
    let mut seen = HashSet::new();
    for named in policies {
        validate_policy_name(&named.name)?;
        if !seen.insert(named.name.as_str()) {
            return Err(AyinelError::InvalidPolicy(format!(
                "duplicate policy name: {}",
                named.name
            )));
        }
    }
    Ok(())
}

impl Default for NamedPolicy {
    fn default() -> Self {
        NamedPolicy::new("global", RateLimitPolicy::global())
    }
}
