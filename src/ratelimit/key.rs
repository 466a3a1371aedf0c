//! Store key generation.

use super::policy::KEY_SEPARATOR;

/// A key that identifies one client under one policy.
///
/// Policies sharing a store must never share keys, otherwise their counts
/// corrupt each other. The policy name is prefixed to the client identifier.
/// Policy names never contain [`KEY_SEPARATOR`], so client ids may.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The policy this key is counted against
    pub policy: String,
    /// Client identifier, e.g. an IP address or user id
    pub client: String,
}

impl RateLimitKey {
    pub fn new(policy: &str, client: &str) -> Self {
        Self {
            policy: policy.to_string(),
            client: client.to_string(),
        }
    }

    /// The string used as the store key, `policy:client`.
    pub fn to_store_key(&self) -> String {
        format!("{}{}{}", self.policy, KEY_SEPARATOR, self.client)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}
