//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use chrono::NaiveDate;
use smart_bridge::app::Services;
use smart_bridge::auth::signature::sign_request;
use smart_bridge::auth::{HEADER_API_KEY, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use smart_bridge::config::Config;
use smart_bridge::models::{
    ApiCredential, ClickEvent, CredentialStatus, DailyStats, NewClickEvent, NewCredential,
    NewLink, ShortLink,
};
use smart_bridge::storage::filter::{RefererVisitorRow, VisitorActivity};
use smart_bridge::storage::{
    ClickFilter, Dimension, SqliteStorage, Storage, StorageResult, TimeBucket,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tower::Layer;

pub const CLIENT_ID: &str = "SmartBridgeDesktop/1.4.0";

pub async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

pub fn test_config() -> Config {
    Config::for_database("sqlite::memory:")
}

pub async fn create_test_services(config: Config) -> Arc<Services> {
    let storage = create_test_storage().await;
    Services::build(config, storage).await.unwrap()
}

pub async fn create_link(storage: &Arc<dyn Storage>, slug: &str, target_url: &str) -> ShortLink {
    storage
        .create_link(&NewLink {
            slug: slug.to_string(),
            target_url: target_url.to_string(),
            platform: smart_bridge::links::platform::detect_platform(target_url),
            owner_id: Some(1),
        })
        .await
        .unwrap()
}

pub async fn issue_credential(storage: &Arc<dyn Storage>, owner_id: i64) -> ApiCredential {
    storage
        .insert_credential(&NewCredential::generate(owner_id, None))
        .await
        .unwrap()
}

/// Appends a click with the given visitor, time and referer; desktop Chrome otherwise.
pub async fn insert_click(
    storage: &Arc<dyn Storage>,
    link: &ShortLink,
    visitor: &str,
    visited_at: i64,
    referer: Option<&str>,
) -> i64 {
    storage
        .insert_click(&NewClickEvent {
            link_id: link.id,
            visitor_ip_hash: visitor.to_string(),
            platform: link.platform.clone(),
            referer: referer.map(str::to_string),
            user_agent: None,
            device: "Desktop".to_string(),
            os: "Windows".to_string(),
            browser: "Chrome".to_string(),
            visited_at,
        })
        .await
        .unwrap()
}

pub fn unix(date: &str, hour: u32) -> i64 {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp()
}

pub fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

/// Builds a `POST /links` request signed with `credential`.
pub fn signed_request(
    credential: &ApiCredential,
    body: &str,
    timestamp: i64,
    nonce: &str,
) -> Request<Body> {
    let timestamp = timestamp.to_string();
    let signature = sign_request(&credential.secret_key, body.as_bytes(), &timestamp, nonce).unwrap();
    Request::builder()
        .method("POST")
        .uri("/links")
        .header("content-type", "application/json")
        .header("user-agent", CLIENT_ID)
        .header(HEADER_API_KEY, &credential.api_key)
        .header(HEADER_TIMESTAMP, timestamp)
        .header(HEADER_NONCE, nonce)
        .header(HEADER_SIGNATURE, signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn nonce(n: usize) -> String {
    format!("test-nonce-{n:08}")
}

/// Injects `ConnectInfo` the way `into_make_service_with_connect_info` would.
#[derive(Clone)]
pub struct TestConnectInfoLayer(pub SocketAddr);

impl Default for TestConnectInfoLayer {
    fn default() -> Self {
        Self(SocketAddr::from(([127, 0, 0, 1], 12345)))
    }
}

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware {
            inner,
            addr: self.0,
        }
    }
}

#[derive(Clone)]
pub struct TestConnectInfoMiddleware<S> {
    inner: S,
    addr: SocketAddr,
}

impl<S, B> tower::Service<Request<B>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<B>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        req.extensions_mut()
            .insert(axum::extract::connect_info::ConnectInfo(self.addr));
        self.inner.call(req)
    }
}

/// Delegates to an inner store but refuses to write daily stats for one date,
/// and optionally refuses every click insert.
pub struct FailingStorage {
    pub inner: Arc<dyn Storage>,
    pub fail_on: NaiveDate,
    pub fail_clicks: AtomicBool,
    pub upserts: AtomicUsize,
    pub click_attempts: AtomicUsize,
}

impl FailingStorage {
    pub fn new(inner: Arc<dyn Storage>, fail_on: NaiveDate) -> Self {
        Self {
            inner,
            fail_on,
            fail_clicks: AtomicBool::new(false),
            upserts: AtomicUsize::new(0),
            click_attempts: AtomicUsize::new(0),
        }
    }

    /// A store whose event table is unreachable.
    pub fn rejecting_clicks(inner: Arc<dyn Storage>) -> Self {
        let storage = Self::new(inner, NaiveDate::MIN);
        storage.fail_clicks.store(true, Ordering::SeqCst);
        storage
    }
}

#[async_trait]
impl Storage for FailingStorage {
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
        self.inner.get_link_by_slug(slug).await
    }

    async fn get_links_by_ids(&self, ids: &[i64]) -> Result<Vec<ShortLink>> {
        self.inner.get_links_by_ids(ids).await
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        self.inner.slug_exists(slug).await
    }

    async fn delete_link(&self, id: i64) -> Result<bool> {
        self.inner.delete_link(id).await
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
        self.click_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_clicks.load(Ordering::SeqCst) {
            return Err(anyhow!("event store unreachable"));
        }
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
        if stats.stats_date == self.fail_on {
            return Err(anyhow!("simulated write failure for {}", stats.stats_date));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
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
