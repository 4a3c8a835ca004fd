//! Management listener: signed link creation and the stats dashboard API.

pub mod analytics;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::create_api_router;
