use anyhow::Result;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use crate::app::Services;

use super::handlers::{health_check, redirect_by_path, redirect_by_query, RedirectState};
use super::interstitial::InterstitialRenderer;
use super::middleware::record_request_received;

pub fn create_redirect_router(services: Arc<Services>) -> Result<Router> {
    let short_route = format!(
        "/{}/{{slug}}",
        services.config.links.short_path.trim_matches('/')
    );
    let state = Arc::new(RedirectState {
        services,
        interstitial: InterstitialRenderer::new()?,
    });

    Ok(Router::new()
        .route("/", get(redirect_by_query))
        .route("/health", get(health_check))
        .route(&short_route, get(redirect_by_path))
        .layer(middleware::from_fn(record_request_received))
        .with_state(state))
}
