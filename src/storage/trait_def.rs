use crate::models::{
    ApiCredential, ClickEvent, CredentialStatus, DailyStats, NewClickEvent, NewCredential,
    NewLink, ShortLink,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use super::filter::{ClickFilter, Dimension, RefererVisitorRow, TimeBucket, VisitorActivity};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Link registry, append-only click log, API credentials and settings.
///
/// Concurrency guarantees live here: slug and api-key uniqueness come from
/// UNIQUE constraints and the click counter is bumped in a single statement.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create tables and indexes if missing
    async fn init(&self) -> Result<()>;

    // ---- link registry ----

    /// Insert a link. `Conflict` when the slug is taken.
    async fn create_link(&self, link: &NewLink) -> StorageResult<ShortLink>;

    async fn get_link(&self, id: i64) -> Result<Option<ShortLink>>;

    async fn get_link_by_slug(&self, slug: &str) -> Result<Option<ShortLink>>;

    /// Links that still exist among `ids`, in no particular order
    async fn get_links_by_ids(&self, ids: &[i64]) -> Result<Vec<ShortLink>>;

    async fn slug_exists(&self, slug: &str) -> Result<bool>;

    async fn delete_link(&self, id: i64) -> Result<bool>;

    /// Atomic `click_count + 1`, returning the new value
    async fn increment_clicks(&self, id: i64) -> Result<i64>;

    async fn count_links(&self) -> Result<i64>;

    async fn get_link_meta(&self, link_id: i64, key: &str) -> Result<Option<String>>;

    async fn set_link_meta(&self, link_id: i64, key: &str, value: &str) -> Result<()>;

    // ---- event store ----

    /// Append one click, returning its id
    async fn insert_click(&self, event: &NewClickEvent) -> Result<i64>;

    async fn count_clicks(&self, filter: &ClickFilter) -> Result<i64>;

    async fn count_unique_visitors(&self, filter: &ClickFilter) -> Result<i64>;

    /// `(bucket, clicks)` pairs for non-empty buckets only
    async fn bucket_counts(
        &self,
        filter: &ClickFilter,
        bucket: TimeBucket,
        utc_offset_secs: i64,
    ) -> Result<Vec<(i64, i64)>>;

    /// `(value, clicks)` ordered by clicks descending
    async fn dimension_counts(
        &self,
        filter: &ClickFilter,
        dimension: Dimension,
    ) -> Result<Vec<(String, i64)>>;

    /// `(link_id, clicks)` ordered by clicks descending
    async fn top_link_counts(&self, filter: &ClickFilter, limit: i64) -> Result<Vec<(i64, i64)>>;

    async fn referer_visitor_counts(&self, filter: &ClickFilter) -> Result<Vec<RefererVisitorRow>>;

    /// Visitors with at least one click at or after `range_start` within the
    /// filter bounds; `active_days` counts every day inside the bounds.
    async fn visitor_activity(
        &self,
        filter: &ClickFilter,
        range_start: i64,
        utc_offset_secs: i64,
    ) -> Result<Vec<VisitorActivity>>;

    async fn distinct_platforms(&self) -> Result<Vec<String>>;

    /// Events with `id > after_id`, oldest first. Without `after_id`, the
    /// newest `limit` events, still oldest first.
    async fn recent_clicks(
        &self,
        after_id: Option<i64>,
        platform: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ClickEvent>>;

    /// Highest event id, 0 when empty
    async fn latest_click_id(&self) -> Result<i64>;

    async fn upsert_daily_stats(&self, stats: &DailyStats) -> Result<()>;

    async fn get_daily_stats(&self, date: NaiveDate) -> Result<Option<DailyStats>>;

    // ---- credentials ----

    async fn insert_credential(&self, credential: &NewCredential) -> StorageResult<ApiCredential>;

    async fn get_credential(&self, api_key: &str) -> Result<Option<ApiCredential>>;

    async fn touch_credential(&self, api_key: &str, used_at: i64) -> Result<()>;

    async fn set_credential_status(&self, api_key: &str, status: CredentialStatus) -> Result<bool>;

    async fn list_credentials(&self, owner_id: Option<i64>) -> Result<Vec<ApiCredential>>;

    // ---- settings ----

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
