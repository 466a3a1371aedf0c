//! HTTP surface: the rate limiting middleware and a small server around it.

mod guard;
mod server;

pub use guard::{
    apply_headers, client_key, rate_limit_guard, GuardDecision, RateLimitGuard, UNKNOWN_CLIENT,
};
pub use server::HttpServer;
