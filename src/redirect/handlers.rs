use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, LOCATION, PRAGMA, REFERER, USER_AGENT},
        HeaderMap, HeaderName, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::interstitial::InterstitialRenderer;
use super::middleware::RequestReceived;
use crate::app::Services;
use crate::client_ip::extract_client_ip;
use crate::clicklog::ClickContext;
use crate::links::slug::is_valid_slug;
use crate::links::target::parse_redirect_target;
use crate::models::link::meta_keys;
use crate::models::ShortLink;

const NO_STORE: &str = "no-store, no-cache, must-revalidate, max-age=0";
const REDIRECT_BY: &str = "smart-bridge";

pub struct RedirectState {
    pub services: Arc<Services>,
    pub interstitial: InterstitialRenderer,
}

#[derive(Debug, Deserialize)]
pub struct GoQuery {
    pub go: Option<String>,
}

/// `GET /{short_path}/{slug}`
pub async fn redirect_by_path(
    State(state): State<Arc<RedirectState>>,
    Path(slug): Path<String>,
    Extension(received): Extension<RequestReceived>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    redirect(&state, slug, received, addr, &headers).await
}

/// `GET /?go={slug}`
pub async fn redirect_by_query(
    State(state): State<Arc<RedirectState>>,
    Query(query): Query<GoQuery>,
    Extension(received): Extension<RequestReceived>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    match query.go {
        Some(slug) if !slug.trim().is_empty() => {
            redirect(&state, slug.trim().to_string(), received, addr, &headers).await
        }
        _ => not_found(),
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Link not found").into_response()
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn no_store_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
}

async fn redirect(
    state: &RedirectState,
    slug: String,
    received: RequestReceived,
    addr: SocketAddr,
    headers: &HeaderMap,
) -> Response {
    let services = &state.services;
    if !is_valid_slug(&slug) {
        return not_found();
    }

    let link = match services.storage.get_link_by_slug(&slug).await {
        Ok(Some(link)) => link,
        Ok(None) => return not_found(),
        Err(err) => {
            error!(slug = %slug, error = %err, "slug lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    let Some(target) = parse_redirect_target(&link.target_url) else {
        warn!(slug = %slug, target = %link.target_url, "refusing to redirect to unsafe target");
        return (StatusCode::FORBIDDEN, "Invalid redirect target").into_response();
    };

    let ctx = ClickContext {
        client_ip: extract_client_ip(headers, addr.ip(), &services.config.client_ip),
        link_id: link.id,
        slug,
        platform: link.platform.clone(),
        referer: header_string(headers, REFERER),
        user_agent: header_string(headers, USER_AGENT),
        visited_at: received.at,
    };

    let delay = services.settings.redirect_delay().await;
    let response = if delay > 0.0 {
        // the visitor may leave before the countdown ends
        services.click_logger.log_sync(ctx).await;
        interstitial_response(state, &link, &target, delay).await
    } else {
        services.click_logger.log(ctx).await;
        immediate_response(&link, &target)
    };

    debug!(
        slug = %link.slug,
        elapsed_ms = received.started.elapsed().as_millis() as u64,
        "redirect served"
    );
    response
}

fn immediate_response(link: &ShortLink, target: &url::Url) -> Response {
    // the stored URL is sent as submitted when it is a valid header value
    let location = HeaderValue::from_str(&link.target_url)
        .or_else(|_| HeaderValue::from_str(target.as_str()));
    let Ok(location) = location else {
        return (StatusCode::FORBIDDEN, "Invalid redirect target").into_response();
    };

    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(LOCATION, location);
    no_store_headers(&mut response);
    let headers = response.headers_mut();
    headers.insert("x-redirect-by", HeaderValue::from_static(REDIRECT_BY));
    headers.insert("referrer-policy", HeaderValue::from_static("unsafe-url"));
    response
}

async fn interstitial_response(
    state: &RedirectState,
    link: &ShortLink,
    target: &url::Url,
    delay: f64,
) -> Response {
    let message = match state
        .services
        .storage
        .get_link_meta(link.id, meta_keys::LOADING_MESSAGE)
        .await
    {
        Ok(Some(message)) if !message.trim().is_empty() => message,
        Ok(_) => state.services.settings.default_loading_message().await,
        Err(err) => {
            warn!(slug = %link.slug, error = %err, "loading message lookup failed");
            state.services.settings.default_loading_message().await
        }
    };

    let html = match state.interstitial.render(&link.target_url, delay, &message) {
        Ok(html) => html,
        Err(err) => {
            error!(
                slug = %link.slug,
                error = %err,
                "interstitial render failed, redirecting directly"
            );
            return immediate_response(link, target);
        }
    };

    let mut response = (StatusCode::OK, html).into_response();
    no_store_headers(&mut response);
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    headers.insert("x-robots-tag", HeaderValue::from_static("noindex, nofollow"));
    headers.insert("referrer-policy", HeaderValue::from_static("unsafe-url"));
    response
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: &'static str,
    }

    Json(HealthResponse { status: "OK" })
}
