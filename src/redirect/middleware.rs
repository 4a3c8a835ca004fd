use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::storage::unix_now;

/// When the request arrived; a click's `visited_at` comes from here.
#[derive(Copy, Clone)]
pub struct RequestReceived {
    pub at: i64,
    pub started: Instant,
}

pub async fn record_request_received(mut request: Request<Body>, next: Next) -> Response {
    request.extensions_mut().insert(RequestReceived {
        at: unix_now(),
        started: Instant::now(),
    });
    next.run(request).await
}
