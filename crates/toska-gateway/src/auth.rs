//! Access middleware: bearer authentication, rate limiting, read-only gate.
//!
//! Three sequential stages, any of which halts the pipeline. Applied to KV
//! paths and `/stats` only; health, replication and the root bypass it.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use toska_store::now_ms;

use crate::error::ApiError;
use crate::server::AppState;

/// Identity used when the transport cannot tell us the peer address.
const UNKNOWN_CLIENT: &str = "unknown";

/// The three-stage access check.
pub async fn access_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    let token = state.cache.auth_token();
    if !token.is_empty() && !has_valid_token(request.headers(), &token) {
        tracing::debug!(client = %client, "rejected: bad or missing token");
        return ApiError::Unauthorized.into_response();
    }

    let per_sec = state.cache.rate_limit_per_sec();
    let burst = state.cache.rate_limit_burst();
    if !state.limiter.check(&client, per_sec, burst, now_ms()) {
        tracing::debug!(client = %client, "rejected: rate limited");
        return ApiError::RateLimited.into_response();
    }

    if state.cache.follower_mode() && is_kv_mutation(request.method(), request.uri().path()) {
        return ApiError::ReadOnly.into_response();
    }

    next.run(request).await
}

/// A request authenticates when one of these headers matches the token
/// exactly: `Authorization: Bearer <t>`, `Authorization: <t>`, or
/// `X-Toska-Token: <t>`.
fn has_valid_token(headers: &HeaderMap, token: &str) -> bool {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if value == token {
            return true;
        }
        if let Some(bearer) = value.strip_prefix("Bearer ") {
            if bearer == token {
                return true;
            }
        }
    }
    headers
        .get("x-toska-token")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|value| value == token)
}

/// PUT or DELETE on a KV path mutates local state.
fn is_kv_mutation(method: &Method, path: &str) -> bool {
    (method == Method::PUT || method == Method::DELETE) && path.starts_with("/kv/")
}
