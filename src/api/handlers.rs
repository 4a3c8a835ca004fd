use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use super::middleware::{ClientIp, RateLimitChecked};
use crate::app::Services;
use crate::auth::AuthRequest;
use crate::client_ip::extract_client_ip;
use crate::error::ApiError;
use crate::models::{CreateLinkRequest, CreateLinkResponse};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// `POST /links`: signed request from a desktop client.
///
/// The body is taken raw because the signature covers its exact bytes.
pub async fn create_link(
    State(services): State<Arc<Services>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    client_ip: Option<Extension<ClientIp>>,
    edge_checked: Option<Extension<RateLimitChecked>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CreateLinkResponse>, ApiError> {
    let client_ip = match client_ip {
        Some(Extension(ClientIp(ip))) => ip,
        None => extract_client_ip(&headers, addr.ip(), &services.config.client_ip),
    };

    let credential = services
        .authenticator
        .authenticate(&AuthRequest {
            headers: &headers,
            body: &body,
            client_ip,
            rate_limit_checked: edge_checked.is_some(),
        })
        .await?;

    let request: CreateLinkRequest =
        serde_json::from_slice(&body).map_err(|err| ApiError::InvalidRequest(err.to_string()))?;

    let created = services
        .links
        .create(&request, Some(credential.owner_id))
        .await?;
    services.today.invalidate_platforms().await;
    Ok(Json(created))
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "OK" })
}
