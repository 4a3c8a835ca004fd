use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use smart_bridge::app::{connect_storage, Services};
use smart_bridge::config::{AuthMode, Config};
use smart_bridge::shutdown::Shutdown;
use smart_bridge::{api, redirect};

const RATE_LIMIT_SWEEP_EVERY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let storage = connect_storage(&config.database).await?;
    info!("Database initialized successfully");

    let services = Services::build(config, storage).await?;
    let config = Arc::clone(&services.config);

    match config.auth.mode {
        AuthMode::None => info!("🔓 Stats endpoints are open - session auth is disabled"),
        AuthMode::Session => info!("🔐 Stats endpoints require a session token"),
    }

    let aggregator = Arc::clone(&services.aggregator);
    match aggregator.catch_up(aggregator.today()).await {
        Ok(0) => {}
        Ok(days) => info!(days, "caught up on missed daily aggregation"),
        Err(err) => tracing::warn!(error = %err, "startup aggregation catch-up failed"),
    }
    let scheduler = Arc::clone(&aggregator).spawn_scheduler();
    let sweeper = Arc::clone(&services.rate_limiter).spawn_sweeper(RATE_LIMIT_SWEEP_EVERY);

    let api_router = api::create_api_router(Arc::clone(&services));
    let redirect_router = redirect::create_redirect_router(Arc::clone(&services))?;

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);

    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr).await?;
    info!("🚀 Redirect server listening on http://{}", redirect_addr);
    info!(
        "   - Short links look like {}",
        config.links.short_link("{slug}")
    );

    let shutdown = Shutdown::install();
    tokio::try_join!(
        axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.clone().wait()),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.wait()),
    )?;

    info!("Listeners stopped, draining click log");
    scheduler.abort();
    sweeper.abort();
    services.click_logger.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
