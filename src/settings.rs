//! Runtime settings kept in the store and read through a short-lived cache.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::links::slug::random_base62;
use crate::storage::Storage;

pub const REDIRECT_DELAY: &str = "redirect_delay";
pub const DEFAULT_LOADING_MESSAGE: &str = "default_loading_message";
pub const IP_HASH_SALT: &str = "ip_hash_salt";
pub const LAST_AGGREGATION_DATE: &str = "last_aggregation_date";

pub const FALLBACK_LOADING_MESSAGE: &str = "Taking you to your destination";

const SALT_LEN: usize = 48;
const CACHE_TTL: Duration = Duration::from_secs(30);

pub struct SettingsService {
    storage: Arc<dyn Storage>,
    cache: Cache<String, Option<String>>,
    salt: String,
}

impl SettingsService {
    /// Loads settings, generating the visitor-hash salt on first start.
    pub async fn load(storage: Arc<dyn Storage>) -> Result<Self> {
        let salt = match storage.get_setting(IP_HASH_SALT).await? {
            Some(salt) if !salt.is_empty() => salt,
            _ => {
                storage
                    .set_setting(IP_HASH_SALT, &random_base62(SALT_LEN))
                    .await?;
                tracing::info!("generated visitor hash salt");
                // re-read so concurrent first starts converge on one value
                storage
                    .get_setting(IP_HASH_SALT)
                    .await?
                    .ok_or_else(|| anyhow!("visitor hash salt missing after write"))?
            }
        };

        Ok(Self {
            storage,
            cache: Cache::builder().time_to_live(CACHE_TTL).build(),
            salt,
        })
    }

    pub fn ip_hash_salt(&self) -> &str {
        &self.salt
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let storage = Arc::clone(&self.storage);
        let owned_key = key.to_string();
        self.cache
            .try_get_with(key.to_string(), async move { storage.get_setting(&owned_key).await })
            .await
            .map_err(|err| anyhow!("failed to read setting '{key}': {err:#}"))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.storage.set_setting(key, value).await?;
        self.cache.invalidate(key).await;
        Ok(())
    }

    /// Interstitial delay in seconds; unset, unparseable or negative means none.
    pub async fn redirect_delay(&self) -> f64 {
        match self.get(REDIRECT_DELAY).await {
            Ok(Some(raw)) => match raw.trim().parse::<f64>() {
                Ok(delay) if delay.is_finite() && delay > 0.0 => delay,
                Ok(_) => 0.0,
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring unparseable redirect_delay");
                    0.0
                }
            },
            Ok(None) => 0.0,
            Err(err) => {
                tracing::warn!(error = %err, "redirect_delay unavailable, redirecting immediately");
                0.0
            }
        }
    }

    pub async fn default_loading_message(&self) -> String {
        match self.get(DEFAULT_LOADING_MESSAGE).await {
            Ok(Some(message)) if !message.trim().is_empty() => message,
            Ok(_) => FALLBACK_LOADING_MESSAGE.to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "default_loading_message unavailable");
                FALLBACK_LOADING_MESSAGE.to_string()
            }
        }
    }

    /// Read past the cache: the aggregation marker must never be stale.
    pub async fn last_aggregation_date(&self) -> Result<Option<NaiveDate>> {
        self.storage
            .get_setting(LAST_AGGREGATION_DATE)
            .await?
            .map(|raw| {
                NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                    .with_context(|| format!("bad {LAST_AGGREGATION_DATE} '{raw}'"))
            })
            .transpose()
    }

    pub async fn set_last_aggregation_date(&self, date: NaiveDate) -> Result<()> {
        self.set(LAST_AGGREGATION_DATE, &date.format("%Y-%m-%d").to_string())
            .await
    }
}
