use axum::{
    extract::{ConnectInfo, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::app::Services;
use crate::client_ip::extract_client_ip;
use crate::config::AuthMode;
use crate::error::ApiError;

/// Client address as resolved through the trusted-proxy rules.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

/// Marks a request the edge limiter already counted.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitChecked;

/// Owner of the session that made the request; 0 when auth is disabled.
#[derive(Debug, Clone, Copy)]
pub struct SessionOwner(pub i64);

/// Counts the request against the per-IP window before the body is read.
pub async fn edge_rate_limit(
    State(services): State<Arc<Services>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(request.headers(), addr.ip(), &services.config.client_ip);
    if let Err(limited) = services.rate_limiter.check(ip) {
        tracing::warn!(ip = %ip, "rate limit exceeded at edge");
        return ApiError::RateLimited(limited.retry_after_secs).into_response();
    }
    request.extensions_mut().insert(ClientIp(ip));
    request.extensions_mut().insert(RateLimitChecked);
    next.run(request).await
}

pub async fn session_auth(
    State(services): State<Arc<Services>>,
    mut request: Request,
    next: Next,
) -> Response {
    let owner = match (services.config.auth.mode, services.sessions.as_ref()) {
        (AuthMode::None, _) => 0,
        (AuthMode::Session, Some(keys)) => {
            let token = request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(str::trim);
            match token.map(|token| keys.verify(token)) {
                Some(Ok(owner)) => owner,
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "rejected session token");
                    return ApiError::Unauthorized.into_response();
                }
                None => return ApiError::Unauthorized.into_response(),
            }
        }
        (AuthMode::Session, None) => return ApiError::Unauthorized.into_response(),
    };
    request.extensions_mut().insert(SessionOwner(owner));
    next.run(request).await
}

/// Runs the missed-aggregation check off the request path.
pub async fn aggregation_check(
    State(services): State<Arc<Services>>,
    request: Request,
    next: Next,
) -> Response {
    let aggregator = Arc::clone(&services.aggregator);
    tokio::spawn(async move {
        let today = aggregator.today();
        if let Err(err) = aggregator.check_missed(today).await {
            tracing::warn!(error = %err, "missed aggregation check failed");
        }
    });
    next.run(request).await
}
