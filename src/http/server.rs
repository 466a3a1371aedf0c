//! HTTP servers: a public listener with guarded routes and an admin listener
//! for diagnostics and key management.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::guard::{client_key, rate_limit_guard, RateLimitGuard};
use crate::config::ServerConfig;
use crate::error::{AyinelError, Result};
use crate::ratelimit::{NamedPolicy, RateLimitInfo, RateLimitKey, RateLimitStatistics};

/// HTTP server for the rate limiter.
///
/// The public listener serves `/health`, the read-only `/ratelimit/status`
/// and everything under `/api`, which passes through the guard. Statistics,
/// key resets and policy updates are only routed on the admin listener.
pub struct HttpServer {
    /// Public address
    addr: SocketAddr,
    /// Admin address
    admin_addr: SocketAddr,
    /// Guard shared by all routes
    guard: RateLimitGuard,
}

impl HttpServer {
    pub fn new(config: &ServerConfig, guard: RateLimitGuard) -> Self {
        Self {
            addr: config.http_addr,
            admin_addr: config.admin_addr,
            guard,
        }
    }

    /// Build the public router without binding.
    pub fn router(&self) -> Router {
        let guarded = Router::new()
            .route("/api/ping", get(ping))
            .route_layer(middleware::from_fn_with_state(
                self.guard.clone(),
                rate_limit_guard,
            ));

        Router::new()
            .route("/health", get(health))
            .route("/ratelimit/status", get(status))
            .merge(guarded)
            .with_state(self.guard.clone())
    }

    /// Build the admin router without binding.
    pub fn admin_router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/ratelimit/stats", get(statistics))
            .route("/ratelimit/keys/:policy/:client", delete(reset_key))
            .route("/ratelimit/policies", get(list_policies).put(replace_policies))
            .with_state(self.guard.clone())
    }

    /// Serve both listeners until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let admin_listener = TcpListener::bind(self.admin_addr).await?;

        info!(
            addr = %listener.local_addr()?,
            admin_addr = %admin_listener.local_addr()?,
            trust_proxy_headers = self.guard.trusts_proxy_headers(),
            "Starting HTTP servers with graceful shutdown"
        );

        let app = self.router();
        let admin_app = self.admin_router();

        // One signal, two servers
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut admin_stop_rx = stop_rx.clone();
        let mut public_stop_rx = stop_rx;

        let notify = async move {
            signal.await;
            let _ = stop_tx.send(true);
            Ok::<(), std::io::Error>(())
        };

        let public = async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = public_stop_rx.wait_for(|stop| *stop).await;
            })
            .await
        };

        let admin = async move {
            axum::serve(
                admin_listener,
                admin_app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = admin_stop_rx.wait_for(|stop| *stop).await;
            })
            .await
        };

        tokio::try_join!(notify, public, admin)
            .map(|_| ())
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                AyinelError::Server(e.to_string())
            })
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ping() -> Json<Value> {
    Json(json!({ "pong": true }))
}

async fn statistics(State(guard): State<RateLimitGuard>) -> Json<RateLimitStatistics> {
    Json(guard.store().statistics())
}

async fn status(
    State(guard): State<RateLimitGuard>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Json<Value> {
    let client = client_key(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        guard.trusts_proxy_headers(),
    );
    let policies: BTreeMap<String, RateLimitInfo> = guard.peek(&client).into_iter().collect();

    Json(json!({
        "client": client,
        "policies": policies,
    }))
}

async fn reset_key(
    State(guard): State<RateLimitGuard>,
    Path((policy, client)): Path<(String, String)>,
) -> StatusCode {
    let key = RateLimitKey::new(&policy, &client);
    let removed = guard.store().reset(&key.to_store_key());
    info!(key = %key, removed = removed, "Rate limit key reset via API");
    StatusCode::NO_CONTENT
}

async fn list_policies(State(guard): State<RateLimitGuard>) -> Json<Vec<NamedPolicy>> {
    Json(guard.policies())
}

async fn replace_policies(
    State(guard): State<RateLimitGuard>,
    Json(policies): Json<Vec<NamedPolicy>>,
) -> Response {
    let count = policies.len();
    match guard.set_policies(policies) {
        Ok(()) => {
            info!(policies = count, "Rate limit policies replaced via API");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!(error = %e, "Rejected policy update");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
