//! Redirect listener: resolves short links and logs the click.

pub mod handlers;
pub mod interstitial;
pub mod middleware;
pub mod routes;

pub use routes::create_redirect_router;
