use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::FromRow;

use crate::models::DailyStats;

pub(crate) const LINK_COLUMNS: &str =
    "id, slug, target_url, platform, click_count, owner_id, created_at";

pub(crate) const EVENT_COLUMNS: &str =
    "id, link_id, visitor_ip_hash, platform, referer, user_agent, device, os, browser, visited_at";

pub(crate) const CREDENTIAL_COLUMNS: &str =
    "id, api_key, secret_key, owner_id, status, created_at, last_used_at, expires_at";

/// `daily_stats` as stored: the date as `YYYY-MM-DD`, maps as JSON text.
#[derive(Debug, FromRow)]
pub(crate) struct DailyStatsRow {
    pub stats_date: String,
    pub total_clicks: i64,
    pub unique_visitors: i64,
    pub platform_share: String,
    pub referers: String,
    pub updated_at: i64,
}

impl DailyStatsRow {
    pub fn encode(stats: &DailyStats) -> Result<Self> {
        Ok(Self {
            stats_date: stats.stats_date.format("%Y-%m-%d").to_string(),
            total_clicks: stats.total_clicks,
            unique_visitors: stats.unique_visitors,
            platform_share: serde_json::to_string(&stats.platform_share)?,
            referers: serde_json::to_string(&stats.referers)?,
            updated_at: stats.updated_at,
        })
    }

    pub fn decode(self) -> Result<DailyStats> {
        Ok(DailyStats {
            stats_date: NaiveDate::parse_from_str(&self.stats_date, "%Y-%m-%d")
                .with_context(|| format!("bad stats_date '{}'", self.stats_date))?,
            total_clicks: self.total_clicks,
            unique_visitors: self.unique_visitors,
            platform_share: serde_json::from_str(&self.platform_share)
                .context("bad platform_share JSON")?,
            referers: serde_json::from_str(&self.referers).context("bad referers JSON")?,
            updated_at: self.updated_at,
        })
    }
}
