//! Rate limiting middleware for axum routers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{trace, warn};

use crate::error::Result;
use crate::ratelimit::{
    validate_policies, NamedPolicy, RateLimitInfo, RateLimitKey, RateLimitStore,
};

/// Client key used when no address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Shared state for the middleware: one store and the policies each request is counted against.
#[derive(Clone)]
pub struct RateLimitGuard {
    store: Arc<RateLimitStore>,
    policies: Arc<RwLock<Vec<NamedPolicy>>>,
    trust_proxy_headers: bool,
}

/// What the guard decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Within budget for every policy. Carries the policy with the least remaining budget.
    Allow { policy: String, info: RateLimitInfo },
    /// Over budget for at least one policy. Carries the first such policy.
    Reject { policy: String, info: RateLimitInfo },
    /// No policies configured.
    Unlimited,
}

impl RateLimitGuard {
    /// Fails when two policies would share store keys.
    pub fn new(store: Arc<RateLimitStore>, policies: Vec<NamedPolicy>) -> Result<Self> {
        validate_policies(&policies)?;
        Ok(Self {
            store,
            policies: Arc::new(RwLock::new(policies)),
            trust_proxy_headers: false,
        })
    }

    /// Key clients by `X-Forwarded-For`/`X-Real-IP` instead of the peer address.
    /// Only safe behind a proxy that overwrites those headers.
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub fn trusts_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    pub fn store(&self) -> &Arc<RateLimitStore> {
        &self.store
    }

    pub fn policies(&self) -> Vec<NamedPolicy> {
        self.policies.read().clone()
    }

    /// Replace the policy set. Existing counts are kept under their policy names.
    /// An invalid set is rejected and the current one stays in place.
    pub fn set_policies(&self, policies: Vec<NamedPolicy>) -> Result<()> {
        validate_policies(&policies)?;
        *self.policies.write() = policies;
        Ok(())
    }

    /// Count one request from `client` against every policy.
    ///
    /// All policies are counted even after one rejects, so each tier sees
    /// every request.
    pub fn evaluate(&self, client: &str) -> GuardDecision {
        let policies = self.policies.read();

        let mut rejected: Option<(String, RateLimitInfo)> = None;
        let mut tightest: Option<(String, RateLimitInfo)> = None;

        for named in policies.iter() {
            let key = RateLimitKey::new(&named.name, client);
            let info = self.store.check(&key.to_store_key(), &named.policy);

            trace!(key = %key, remaining = info.remaining, "Guard checked policy");

            if info.is_exceeded() {
                if rejected.is_none() {
                    rejected = Some((named.name.clone(), info));
                }
                continue;
            }

            let tighter = tightest
                .as_ref()
                .map_or(true, |(_, current)| info.remaining < current.remaining);
            if tighter {
                tightest = Some((named.name.clone(), info));
            }
        }

        match (rejected, tightest) {
            (Some((policy, info)), _) => GuardDecision::Reject { policy, info },
            (None, Some((policy, info))) => GuardDecision::Allow { policy, info },
            (None, None) => GuardDecision::Unlimited,
        }
    }

    /// Read-only status of `client` under every policy.
    pub fn peek(&self, client: &str) -> Vec<(String, RateLimitInfo)> {
        self.policies
            .read()
            .iter()
            .map(|named| {
                let key = RateLimitKey::new(&named.name, client);
                (
                    named.name.clone(),
                    self.store.status(&key.to_store_key(), &named.policy),
                )
            })
            .collect()
    }
}

/// Middleware counting each request and refusing it with 429 when over budget.
pub async fn rate_limit_guard(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer, guard.trust_proxy_headers);

    match guard.evaluate(&client) {
        GuardDecision::Reject { policy, info } => {
            warn!(
                client = %client,
                policy = %policy,
                limit = info.limit,
                retry_after = ?info.retry_after,
                "Rate limit exceeded, rejecting request"
            );

            let body = Json(json!({
                "error": "rate_limit_exceeded",
                "policy": policy,
                "retry_after": info.retry_after,
            }));
            let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            apply_headers(response.headers_mut(), &info);
            response
        }
        GuardDecision::Allow { info, .. } => {
            let mut response = next.run(request).await;
            apply_headers(response.headers_mut(), &info);
            response
        }
        GuardDecision::Unlimited => next.run(request).await,
    }
}

/// Derive the client key.
///
/// With `trust_proxy_headers` the first `X-Forwarded-For` hop wins, then
/// `X-Real-IP`. Otherwise, and as a fallback, the peer address is used.
pub fn client_key(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers {
        if let Some(ip) = proxied_client(headers) {
            return ip;
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn proxied_client(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// Write the rate limit headers for `info` into `headers`.
pub fn apply_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    for (name, value) in info.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}
