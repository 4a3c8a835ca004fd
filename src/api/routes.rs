use axum::{
    http::Method,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::Services;

use super::analytics::{
    get_comparison, get_devices, get_link_analytics, get_patterns, get_referers, get_stats,
    stream_clicks,
};
use super::handlers::{create_link, health_check};
use super::middleware::{aggregation_check, edge_rate_limit, session_auth};

pub fn create_api_router(services: Arc<Services>) -> Router {
    let link_routes = Router::new()
        .route("/links", post(create_link))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&services),
            edge_rate_limit,
        ));

    let stats_routes = Router::new()
        .route("/stats", get(get_stats))
        .route("/analytics/referers", get(get_referers))
        .route("/analytics/devices", get(get_devices))
        .route("/analytics/comparison", get(get_comparison))
        .route("/analytics/patterns", get(get_patterns))
        .route("/analytics/stream", get(stream_clicks))
        .route("/links/{id}/analytics", get(get_link_analytics))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&services),
            session_auth,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .merge(link_routes)
        .merge(stats_routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&services),
            aggregation_check,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}
