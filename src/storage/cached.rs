use crate::models::{
    ApiCredential, ClickEvent, CredentialStatus, DailyStats, NewClickEvent, NewCredential,
    NewLink, ShortLink,
};
use crate::storage::filter::{
    ClickFilter, Dimension, RefererVisitorRow, TimeBucket, VisitorActivity,
};
use crate::storage::{Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Storage wrapper that keeps recently resolved slugs in memory.
///
/// Only hits are cached, so a link created by another process becomes
/// resolvable immediately. Cached entries carry a stale `click_count`; the
/// redirect path never reads it.
pub struct CachedStorage {
    /// Underlying storage implementation
    inner: Arc<dyn Storage>,
    /// Read cache for slug lookups (Moka cache)
    read_cache: Cache<String, ShortLink>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self { inner, read_cache }
    }

    async fn invalidate_slug(&self, slug: &str) {
        self.read_cache.invalidate(slug).await;
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_link(&self, link: &NewLink) -> StorageResult<ShortLink> {
        self.inner.create_link(link).await
    }

    async fn get_link(&self, id: i64) -> Result<Option<ShortLink>> {
        self.inner.get_link(id).await
    }

    async fn get_link_by_slug(&self, slug: &str) -> Result<Option<ShortLink>> {
        if let Some(link) = self.read_cache.get(slug).await {
            return Ok(Some(link));
        }

        let link = self.inner.get_link_by_slug(slug).await?;
        if let Some(ref found) = link {
            self.read_cache
                .insert(slug.to_string(), found.clone())
                .await;
        }
        Ok(link)
    }

    async fn get_links_by_ids(&self, ids: &[i64]) -> Result<Vec<ShortLink>> {
        self.inner.get_links_by_ids(ids).await
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        self.inner.slug_exists(slug).await
    }

    async fn delete_link(&self, id: i64) -> Result<bool> {
        let existing = self.inner.get_link(id).await?;
        let deleted = self.inner.delete_link(id).await?;
        if let Some(link) = existing {
            self.invalidate_slug(&link.slug).await;
        }
        Ok(deleted)
    }

    async fn increment_clicks(&self, id: i64) -> Result<i64> {
        self.inner.increment_clicks(id).await
    }

    async fn count_links(&self) -> Result<i64> {
        self.inner.count_links().await
    }

    async fn get_link_meta(&self, link_id: i64, key: &str) -> Result<Option<String>> {
        self.inner.get_link_meta(link_id, key).await
    }

    async fn set_link_meta(&self, link_id: i64, key: &str, value: &str) -> Result<()> {
        self.inner.set_link_meta(link_id, key, value).await
    }

    async fn insert_click(&self, event: &NewClickEvent) -> Result<i64> {
        self.inner.insert_click(event).await
    }

    async fn count_clicks(&self, filter: &ClickFilter) -> Result<i64> {
        self.inner.count_clicks(filter).await
    }

    async fn count_unique_visitors(&self, filter: &ClickFilter) -> Result<i64> {
        self.inner.count_unique_visitors(filter).await
    }

    async fn bucket_counts(
        &self,
        filter: &ClickFilter,
        bucket: TimeBucket,
        utc_offset_secs: i64,
    ) -> Result<Vec<(i64, i64)>> {
        self.inner
            .bucket_counts(filter, bucket, utc_offset_secs)
            .await
    }

    async fn dimension_counts(
        &self,
        filter: &ClickFilter,
        dimension: Dimension,
    ) -> Result<Vec<(String, i64)>> {
        self.inner.dimension_counts(filter, dimension).await
    }

    async fn top_link_counts(&self, filter: &ClickFilter, limit: i64) -> Result<Vec<(i64, i64)>> {
        self.inner.top_link_counts(filter, limit).await
    }

    async fn referer_visitor_counts(&self, filter: &ClickFilter) -> Result<Vec<RefererVisitorRow>> {
        self.inner.referer_visitor_counts(filter).await
    }

    async fn visitor_activity(
        &self,
        filter: &ClickFilter,
        range_start: i64,
        utc_offset_secs: i64,
    ) -> Result<Vec<VisitorActivity>> {
        self.inner
            .visitor_activity(filter, range_start, utc_offset_secs)
            .await
    }

    async fn distinct_platforms(&self) -> Result<Vec<String>> {
        self.inner.distinct_platforms().await
    }

    async fn recent_clicks(
        &self,
        after_id: Option<i64>,
        platform: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ClickEvent>> {
        self.inner.recent_clicks(after_id, platform, limit).await
    }

    async fn latest_click_id(&self) -> Result<i64> {
        self.inner.latest_click_id().await
    }

    async fn upsert_daily_stats(&self, stats: &DailyStats) -> Result<()> {
        self.inner.upsert_daily_stats(stats).await
    }

    async fn get_daily_stats(&self, date: NaiveDate) -> Result<Option<DailyStats>> {
        self.inner.get_daily_stats(date).await
    }

    async fn insert_credential(&self, credential: &NewCredential) -> StorageResult<ApiCredential> {
        self.inner.insert_credential(credential).await
    }

    async fn get_credential(&self, api_key: &str) -> Result<Option<ApiCredential>> {
        self.inner.get_credential(api_key).await
    }

    async fn touch_credential(&self, api_key: &str, used_at: i64) -> Result<()> {
        self.inner.touch_credential(api_key, used_at).await
    }

    async fn set_credential_status(&self, api_key: &str, status: CredentialStatus) -> Result<bool> {
        self.inner.set_credential_status(api_key, status).await
    }

    async fn list_credentials(&self, owner_id: Option<i64>) -> Result<Vec<ApiCredential>> {
        self.inner.list_credentials(owner_id).await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_setting(key).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_setting(key, value).await
    }
}
