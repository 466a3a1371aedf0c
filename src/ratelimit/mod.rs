//! Rate limiting logic and state management.

mod entry;
mod info;
mod key;
mod policy;
mod store;
mod sweeper;

pub use entry::RateLimitEntry;
pub use info::{
    RateLimitInfo, RateLimitStatistics, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER,
};
pub use key::RateLimitKey;
pub use policy::{
    validate_policies, validate_policy_name, NamedPolicy, RateLimitPolicy, KEY_SEPARATOR,
    MAX_WINDOW_MS, PRESET_NAMES,
};
pub use store::RateLimitStore;
pub use sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL};
