//! Wiring of the long-lived services shared by both listeners.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::info;

use crate::analytics::{AnalyticsEngine, ClickFeed, DailyAggregator};
use crate::auth::rate_limit::RateLimiter;
use crate::auth::{Authenticator, SessionKeys};
use crate::cache::TodayStats;
use crate::clicklog::{ClickLogger, ClickRecorder};
use crate::config::{AuthMode, Config, DatabaseBackend, DatabaseConfig};
use crate::lease::LeaseTable;
use crate::links::LinkService;
use crate::settings::SettingsService;
use crate::storage::{CachedStorage, PostgresStorage, SqliteStorage, Storage};

pub struct Services {
    pub config: Arc<Config>,
    pub storage: Arc<dyn Storage>,
    pub settings: Arc<SettingsService>,
    pub links: Arc<LinkService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub authenticator: Arc<Authenticator>,
    /// `None` when session auth is disabled
    pub sessions: Option<Arc<SessionKeys>>,
    pub leases: Arc<LeaseTable>,
    pub today: Arc<TodayStats>,
    pub analytics: Arc<AnalyticsEngine>,
    pub aggregator: Arc<DailyAggregator>,
    pub feed: Arc<ClickFeed>,
    pub click_logger: Arc<ClickLogger>,
}

/// Opens the configured backend and creates its tables.
pub async fn connect_storage(database: &DatabaseConfig) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", database.url);
            Arc::new(SqliteStorage::new(&database.url, database.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&database.url, database.max_connections).await?)
        }
    };
    storage.init().await?;
    Ok(storage)
}

impl Services {
    /// Builds every service over `storage`, which must already be initialised.
    /// Spawns the click logger worker, so it must run inside a runtime.
    pub async fn build(config: Config, storage: Arc<dyn Storage>) -> Result<Arc<Self>> {
        let sessions = match (config.auth.mode, config.auth.session_secret.as_deref()) {
            (AuthMode::None, _) => None,
            (AuthMode::Session, Some(secret)) if !secret.is_empty() => {
                Some(Arc::new(SessionKeys::new(secret)))
            }
            (AuthMode::Session, _) => bail!("AUTH_MODE=session requires SESSION_SECRET"),
        };

        let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(
            storage,
            config.cache.link_cache_capacity,
            config.cache.link_cache_ttl_secs,
        ));

        let settings = Arc::new(SettingsService::load(Arc::clone(&storage)).await?);
        let links = Arc::new(LinkService::new(Arc::clone(&storage), config.links.clone())?);

        let rate_limiter = Arc::new(RateLimiter::new(
            config.protocol.rate_limit_max_requests,
            config.protocol.rate_limit_window_secs,
        ));
        let authenticator = Arc::new(Authenticator::new(
            Arc::clone(&storage),
            Arc::clone(&rate_limiter),
            &config.protocol,
        ));

        let leases = Arc::new(LeaseTable::new());
        let today = Arc::new(TodayStats::new(Arc::clone(&storage), config.analytics.offset()));
        let analytics = Arc::new(AnalyticsEngine::new(
            Arc::clone(&storage),
            Arc::clone(&today),
            &config.analytics,
        ));
        let aggregator = Arc::new(DailyAggregator::new(
            Arc::clone(&storage),
            Arc::clone(&settings),
            Arc::clone(&leases),
            &config.analytics,
        ));
        let feed = Arc::new(ClickFeed::new(
            Arc::clone(&storage),
            Arc::clone(&leases),
            &config.feed,
        ));

        let recorder = Arc::new(ClickRecorder::new(
            Arc::clone(&storage),
            Arc::clone(&today),
            Arc::clone(&feed),
            settings.ip_hash_salt().to_string(),
        ));
        let click_logger = Arc::new(ClickLogger::spawn(recorder, &config.click_logger));

        Ok(Arc::new(Self {
            config: Arc::new(config),
            storage,
            settings,
            links,
            rate_limiter,
            authenticator,
            sessions,
            leases,
            today,
            analytics,
            aggregator,
            feed,
            click_logger,
        }))
    }
}
