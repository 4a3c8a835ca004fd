use anyhow::Context;
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    pub links: LinkConfig,
    pub auth: AuthConfig,
    pub protocol: ProtocolConfig,
    pub client_ip: ClientIpConfig,
    pub analytics: AnalyticsConfig,
    pub click_logger: ClickLoggerConfig,
    pub feed: FeedConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where short links live publicly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Base URL of the redirect listener as seen by visitors, without trailing slash
    pub public_base_url: String,
    /// First path segment of short links (`/go/{slug}`)
    pub short_path: String,
}

impl LinkConfig {
    pub fn short_link(&self, slug: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.short_path, slug)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    Session,
}

/// Session authentication for the stats endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    #[serde(skip_serializing)]
    pub session_secret: Option<String>,
}

/// Parameters of the signed link-creation protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub timestamp_tolerance_secs: i64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: i64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance_secs: ProtocolConfig::default_tolerance_secs(),
            rate_limit_max_requests: ProtocolConfig::default_rate_limit_max(),
            rate_limit_window_secs: ProtocolConfig::default_rate_limit_window_secs(),
        }
    }
}

impl ProtocolConfig {
    const fn default_tolerance_secs() -> i64 {
        10
    }

    const fn default_rate_limit_max() -> u32 {
        60
    }

    const fn default_rate_limit_window_secs() -> i64 {
        60
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    None,
    Standard,
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Offset of the local calendar used for day and hour bucketing
    pub utc_offset_minutes: i32,
    pub anomaly_threshold_sigma: f64,
    pub returning_lookback_days: i64,
    /// Local wall-clock time at which yesterday is rolled up
    pub aggregation_time: NaiveTime,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            anomaly_threshold_sigma: AnalyticsConfig::default_sigma(),
            returning_lookback_days: AnalyticsConfig::default_lookback_days(),
            aggregation_time: AnalyticsConfig::default_aggregation_time(),
        }
    }
}

impl AnalyticsConfig {
    const fn default_sigma() -> f64 {
        2.0
    }

    const fn default_lookback_days() -> i64 {
        30
    }

    fn default_aggregation_time() -> NaiveTime {
        NaiveTime::from_hms_opt(0, 5, 0).unwrap_or(NaiveTime::MIN)
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or(Utc.fix())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickLoggerConfig {
    pub queue_capacity: usize,
    pub concurrency: usize,
}

impl Default for ClickLoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            concurrency: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub max_duration_secs: u64,
    pub lock_ttl_secs: u64,
    pub heartbeat_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 50,
            lock_ttl_secs: 60,
            heartbeat_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub link_cache_capacity: u64,
    pub link_cache_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            link_cache_capacity: 10_000,
            link_cache_ttl_secs: 300,
        }
    }
}

impl Config {
    /// Configuration for tests and tooling: in-memory SQLite, auth disabled, defaults elsewhere.
    pub fn for_database(url: &str) -> Self {
        Config {
            database: DatabaseConfig {
                backend: DatabaseBackend::Sqlite,
                url: url.to_string(),
                max_connections: 1,
            },
            api_server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            redirect_server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            links: LinkConfig {
                public_base_url: "http://localhost:3000".to_string(),
                short_path: "go".to_string(),
            },
            auth: AuthConfig {
                mode: AuthMode::None,
                session_secret: None,
            },
            protocol: ProtocolConfig::default(),
            client_ip: ClientIpConfig::default(),
            analytics: AnalyticsConfig::default(),
            click_logger: ClickLoggerConfig::default(),
            feed: FeedConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./smart-bridge.db".to_string());
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = env_parse("API_PORT", 8080u16)?;

        let redirect_host =
            std::env::var("REDIRECT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let redirect_port = env_parse("REDIRECT_PORT", 3000u16)?;

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", redirect_host, redirect_port))
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&public_base_url)
            .with_context(|| format!("PUBLIC_BASE_URL '{public_base_url}' is not a valid URL"))?;

        let short_path = std::env::var("SHORT_PATH")
            .unwrap_or_else(|_| "go".to_string())
            .trim_matches('/')
            .to_string();
        if short_path.is_empty() || short_path.contains('/') {
            anyhow::bail!("SHORT_PATH must be a single non-empty path segment");
        }

        let auth_mode = match std::env::var("AUTH_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => AuthMode::None,
            "session" => AuthMode::Session,
            other => {
                tracing::warn!(
                    "Unknown AUTH_MODE '{other}', falling back to 'none'. Supported values: none, session"
                );
                AuthMode::None
            }
        };

        let session_secret = std::env::var("SESSION_SECRET").ok();
        if auth_mode == AuthMode::Session && session_secret.is_none() {
            anyhow::bail!("SESSION_SECRET must be set when AUTH_MODE=session");
        }

        let protocol = ProtocolConfig {
            timestamp_tolerance_secs: env_parse(
                "TIMESTAMP_TOLERANCE_SECS",
                ProtocolConfig::default_tolerance_secs(),
            )?,
            rate_limit_max_requests: env_parse(
                "RATE_LIMIT_MAX_REQUESTS",
                ProtocolConfig::default_rate_limit_max(),
            )?,
            rate_limit_window_secs: env_parse(
                "RATE_LIMIT_WINDOW_SECS",
                ProtocolConfig::default_rate_limit_window_secs(),
            )?,
        };

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = std::env::var("TRUSTED_PROXIES")
            .ok()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<IpNet>()
                            .or_else(|_| s.parse::<std::net::IpAddr>().map(IpNet::from))
                            .with_context(|| format!("invalid entry '{s}' in TRUSTED_PROXIES"))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("NUM_TRUSTED_PROXIES must be a non-negative integer")?;

        let aggregation_time = match std::env::var("AGGREGATION_TIME") {
            Ok(raw) => NaiveTime::parse_from_str(&raw, "%H:%M")
                .with_context(|| format!("AGGREGATION_TIME '{raw}' must be HH:MM"))?,
            Err(_) => AnalyticsConfig::default_aggregation_time(),
        };

        let analytics = AnalyticsConfig {
            utc_offset_minutes: env_parse("UTC_OFFSET_MINUTES", 0i32)?,
            anomaly_threshold_sigma: env_parse(
                "ANOMALY_THRESHOLD_SIGMA",
                AnalyticsConfig::default_sigma(),
            )?,
            returning_lookback_days: env_parse(
                "RETURNING_LOOKBACK_DAYS",
                AnalyticsConfig::default_lookback_days(),
            )?,
            aggregation_time,
        };
        if FixedOffset::east_opt(analytics.utc_offset_minutes * 60).is_none() {
            anyhow::bail!("UTC_OFFSET_MINUTES must be within ±1439");
        }

        let logger_defaults = ClickLoggerConfig::default();
        let click_logger = ClickLoggerConfig {
            queue_capacity: env_parse("CLICK_QUEUE_CAPACITY", logger_defaults.queue_capacity)?,
            concurrency: env_parse("CLICK_LOGGER_CONCURRENCY", logger_defaults.concurrency)?
                .max(1),
        };

        let feed_defaults = FeedConfig::default();
        let feed = FeedConfig {
            max_duration_secs: env_parse(
                "FEED_MAX_DURATION_SECS",
                feed_defaults.max_duration_secs,
            )?,
            lock_ttl_secs: env_parse("FEED_LOCK_TTL_SECS", feed_defaults.lock_ttl_secs)?,
            heartbeat_secs: env_parse("FEED_HEARTBEAT_SECS", feed_defaults.heartbeat_secs)?.max(1),
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            link_cache_capacity: env_parse(
                "LINK_CACHE_CAPACITY",
                cache_defaults.link_cache_capacity,
            )?,
            link_cache_ttl_secs: env_parse(
                "LINK_CACHE_TTL_SECS",
                cache_defaults.link_cache_ttl_secs,
            )?,
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            links: LinkConfig {
                public_base_url,
                short_path,
            },
            auth: AuthConfig {
                mode: auth_mode,
                session_secret,
            },
            protocol,
            client_ip: ClientIpConfig {
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
            },
            analytics,
            click_logger,
            feed,
            cache,
        })
    }
}

fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}
