//! Today's click and visitor counters, per link and global, plus the list of
//! platforms seen so far.
//!
//! Per-link counters are persisted to link meta in the versioned
//! [`DailyCounter`] form so a cold cache does not need a recount. Legacy
//! `count|date` values are rewritten on first read.

use anyhow::Result;
use chrono::{FixedOffset, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::tagged::TaggedCache;
use crate::analytics::models::{local_date, DateRange};
use crate::models::link::meta_keys;
use crate::models::{DailyCounter, StoredDailyCounter};
use crate::storage::{unix_now, ClickFilter, Storage};

const TODAY_TAG: &str = "today";
const PLATFORMS_TAG: &str = "platforms";
const PLATFORMS_KEY: &str = "platforms";
const GLOBAL_KEY: &str = "today:global";

const CACHE_CAPACITY: u64 = 50_000;
/// Bounds staleness across a local midnight
const CACHE_TTL: Duration = Duration::from_secs(60);
const WRITE_STRIPES: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TodayCounts {
    pub clicks: u64,
    pub visitors: u64,
}

#[derive(Debug, Clone)]
enum Cached {
    Counts(TodayCounts),
    Platforms(Arc<Vec<String>>),
}

pub struct TodayStats {
    storage: Arc<dyn Storage>,
    cache: TaggedCache<Cached>,
    offset: FixedOffset,
    /// Serializes recount, persist and cache writes per link. A refresh that
    /// started later always lands last, so the stored value never goes back.
    write_locks: Vec<Mutex<()>>,
}

fn link_key(link_id: i64) -> String {
    format!("today:link:{link_id}")
}

fn link_tag(link_id: i64) -> String {
    format!("link:{link_id}")
}

impl TodayStats {
    pub fn new(storage: Arc<dyn Storage>, offset: FixedOffset) -> Self {
        Self {
            storage,
            cache: TaggedCache::new(CACHE_CAPACITY, CACHE_TTL),
            offset,
            write_locks: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn write_lock(&self, link_id: i64) -> &Mutex<()> {
        &self.write_locks[link_id.rem_euclid(WRITE_STRIPES as i64) as usize]
    }

    fn today_at(&self, now: i64) -> NaiveDate {
        local_date(now, self.offset)
    }

    async fn recount(&self, filter: ClickFilter) -> Result<TodayCounts> {
        let clicks = self.storage.count_clicks(&filter).await?;
        let visitors = self.storage.count_unique_visitors(&filter).await?;
        Ok(TodayCounts {
            clicks: clicks.max(0) as u64,
            visitors: visitors.max(0) as u64,
        })
    }

    fn today_filter(&self, today: NaiveDate) -> ClickFilter {
        ClickFilter::new(DateRange::single(today).bounds(self.offset))
    }

    /// Recomputes a link's counters after a click and stores them.
    pub async fn refresh_link(&self, link_id: i64) -> Result<TodayCounts> {
        self.refresh_link_at(link_id, unix_now()).await
    }

    pub async fn refresh_link_at(&self, link_id: i64, now: i64) -> Result<TodayCounts> {
        let _guard = self.write_lock(link_id).lock().await;
        let tag = link_tag(link_id);
        self.cache.invalidate_tag(&tag).await;
        self.cache.invalidate_tag(TODAY_TAG).await;

        let today = self.today_at(now);
        let counts = self
            .recount(self.today_filter(today).with_link(link_id))
            .await?;
        self.persist(link_id, counts, today, now).await?;

        self.cache
            .insert(&link_key(link_id), Cached::Counts(counts), &[tag.as_str(), TODAY_TAG])
            .await;
        Ok(counts)
    }

    async fn persist(
        &self,
        link_id: i64,
        counts: TodayCounts,
        today: NaiveDate,
        now: i64,
    ) -> Result<()> {
        let clicks = DailyCounter::new(counts.clicks, today, now).encode()?;
        let visitors = DailyCounter::new(counts.visitors, today, now).encode()?;
        self.storage
            .set_link_meta(link_id, meta_keys::TODAY_CLICKS, &clicks)
            .await?;
        self.storage
            .set_link_meta(link_id, meta_keys::TODAY_VISITORS, &visitors)
            .await
    }

    pub async fn link_today(&self, link_id: i64) -> Result<TodayCounts> {
        self.link_today_at(link_id, unix_now()).await
    }

    pub async fn link_today_at(&self, link_id: i64, now: i64) -> Result<TodayCounts> {
        let key = link_key(link_id);
        if let Some(Cached::Counts(counts)) = self.cache.get(&key).await {
            return Ok(counts);
        }

        // a miss fills the cache under the same lock as refreshes
        let _guard = self.write_lock(link_id).lock().await;
        let tag = link_tag(link_id);
        let cached = self
            .cache
            .get_or_load(&key, &[tag.as_str(), TODAY_TAG], || async {
                let today = self.today_at(now);
                let clicks = self.stored_counter(link_id, meta_keys::TODAY_CLICKS).await?;
                let visitors = self.stored_counter(link_id, meta_keys::TODAY_VISITORS).await?;

                let counts = match (clicks, visitors) {
                    (Some(c), Some(v)) if c.date == today && v.date == today => TodayCounts {
                        clicks: c.count_for(today),
                        visitors: v.count_for(today),
                    },
                    _ => {
                        let counts = self
                            .recount(self.today_filter(today).with_link(link_id))
                            .await?;
                        self.persist(link_id, counts, today, now).await?;
                        counts
                    }
                };
                Ok::<_, anyhow::Error>(Cached::Counts(counts))
            })
            .await?;

        Ok(match cached {
            Cached::Counts(counts) => counts,
            Cached::Platforms(_) => TodayCounts::default(),
        })
    }

    /// Reads a stored counter, upgrading legacy values in place. Unreadable
    /// values are treated as absent.
    async fn stored_counter(&self, link_id: i64, key: &str) -> Result<Option<DailyCounter>> {
        let Some(raw) = self.storage.get_link_meta(link_id, key).await? else {
            return Ok(None);
        };
        let stored = match StoredDailyCounter::decode(&raw) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(link_id, key, error = %err, "discarding unreadable daily counter");
                return Ok(None);
            }
        };

        if stored.is_current() {
            return Ok(Some(stored.migrate()));
        }

        let counter = stored.migrate();
        match counter.encode() {
            Ok(encoded) => {
                if let Err(err) = self.storage.set_link_meta(link_id, key, &encoded).await {
                    tracing::warn!(
                        link_id,
                        key,
                        error = %err,
                        "failed to rewrite legacy daily counter"
                    );
                } else {
                    tracing::debug!(link_id, key, "migrated legacy daily counter");
                }
            }
            Err(err) => {
                tracing::warn!(link_id, key, error = %err, "failed to encode daily counter")
            }
        }
        Ok(Some(counter))
    }

    pub async fn global_today(&self) -> Result<TodayCounts> {
        self.global_today_at(unix_now()).await
    }

    pub async fn global_today_at(&self, now: i64) -> Result<TodayCounts> {
        let cached = self
            .cache
            .get_or_load(GLOBAL_KEY, &[TODAY_TAG], || async {
                let counts = self.recount(self.today_filter(self.today_at(now))).await?;
                Ok::<_, anyhow::Error>(Cached::Counts(counts))
            })
            .await?;

        Ok(match cached {
            Cached::Counts(counts) => counts,
            Cached::Platforms(_) => TodayCounts::default(),
        })
    }

    /// Platforms that have at least one recorded click.
    pub async fn platforms(&self) -> Result<Arc<Vec<String>>> {
        let cached = self
            .cache
            .get_or_load(PLATFORMS_KEY, &[PLATFORMS_TAG], || async {
                let platforms = self.storage.distinct_platforms().await?;
                Ok::<_, anyhow::Error>(Cached::Platforms(Arc::new(platforms)))
            })
            .await?;

        Ok(match cached {
            Cached::Platforms(platforms) => platforms,
            Cached::Counts(_) => Arc::new(Vec::new()),
        })
    }

    pub async fn invalidate_platforms(&self) {
        self.cache.invalidate_tag(PLATFORMS_TAG).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::models::day_start;
    use crate::models::{NewClickEvent, NewLink};
    use crate::storage::SqliteStorage;
    use chrono::Offset;

    async fn setup() -> (Arc<dyn Storage>, TodayStats, i64) {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(storage);
        let link = storage
            .create_link(&NewLink {
                slug: "today1".into(),
                target_url: "https://www.coupang.com/vp/products/1".into(),
                platform: "Coupang".into(),
                owner_id: None,
            })
            .await
            .unwrap();
        let today = TodayStats::new(Arc::clone(&storage), chrono::Utc.fix());
        (storage, today, link.id)
    }

    fn click(link_id: i64, visitor: &str, at: i64) -> NewClickEvent {
        NewClickEvent {
            link_id,
            visitor_ip_hash: visitor.into(),
            platform: "Coupang".into(),
            referer: None,
            user_agent: None,
            device: "Desktop".into(),
            os: "Linux".into(),
            browser: "Firefox".into(),
            visited_at: at,
        }
    }

    fn noon(date: &str) -> i64 {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        day_start(date, chrono::Utc.fix()) + 12 * 3600
    }

    #[tokio::test]
    async fn test_refresh_counts_only_today() {
        let (storage, today, link_id) = setup().await;
        let now = noon("2024-05-10");
        storage.insert_click(&click(link_id, "a", now - 86_400)).await.unwrap();
        storage.insert_click(&click(link_id, "a", now - 60)).await.unwrap();
        storage.insert_click(&click(link_id, "b", now - 30)).await.unwrap();
        storage.insert_click(&click(link_id, "b", now)).await.unwrap();

        let counts = today.refresh_link_at(link_id, now).await.unwrap();
        assert_eq!(counts, TodayCounts { clicks: 3, visitors: 2 });

        let raw = storage
            .get_link_meta(link_id, meta_keys::TODAY_CLICKS)
            .await
            .unwrap()
            .unwrap();
        assert!(StoredDailyCounter::decode(&raw).unwrap().is_current());
    }

    #[tokio::test]
    async fn test_refresh_invalidates_global_counter() {
        let (storage, today, link_id) = setup().await;
        let now = noon("2024-05-10");
        assert_eq!(today.global_today_at(now).await.unwrap().clicks, 0);

        storage.insert_click(&click(link_id, "a", now)).await.unwrap();
        // still served from cache
        assert_eq!(today.global_today_at(now).await.unwrap().clicks, 0);

        today.refresh_link_at(link_id, now).await.unwrap();
        assert_eq!(today.global_today_at(now).await.unwrap().clicks, 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_leave_latest_count() {
        let (storage, today, link_id) = setup().await;
        let today = Arc::new(today);
        let now = noon("2024-05-10");

        let mut handles = Vec::new();
        for i in 0..40 {
            let storage = Arc::clone(&storage);
            let today = Arc::clone(&today);
            handles.push(tokio::spawn(async move {
                let visitor = format!("v{}", i % 4);
                storage.insert_click(&click(link_id, &visitor, now)).await.unwrap();
                today.refresh_link_at(link_id, now).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let expected = TodayCounts { clicks: 40, visitors: 4 };
        assert_eq!(today.link_today_at(link_id, now).await.unwrap(), expected);
        let raw = storage
            .get_link_meta(link_id, meta_keys::TODAY_CLICKS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(StoredDailyCounter::decode(&raw).unwrap().migrate().count, 40);
    }

    #[tokio::test]
    async fn test_legacy_meta_is_migrated_on_read() {
        let (storage, today, link_id) = setup().await;
        storage
            .set_link_meta(link_id, meta_keys::TODAY_CLICKS, "7|2024-05-10")
            .await
            .unwrap();
        storage
            .set_link_meta(link_id, meta_keys::TODAY_VISITORS, "4|2024-05-10")
            .await
            .unwrap();

        let counts = today.link_today_at(link_id, noon("2024-05-10")).await.unwrap();
        assert_eq!(counts, TodayCounts { clicks: 7, visitors: 4 });

        let raw = storage
            .get_link_meta(link_id, meta_keys::TODAY_CLICKS)
            .await
            .unwrap()
            .unwrap();
        let stored = StoredDailyCounter::decode(&raw).unwrap();
        assert!(stored.is_current());
        assert_eq!(stored.migrate().count, 7);
    }

    #[tokio::test]
    async fn test_stale_meta_triggers_recount() {
        let (storage, today, link_id) = setup().await;
        let now = noon("2024-05-11");
        storage
            .set_link_meta(link_id, meta_keys::TODAY_CLICKS, "7|2024-05-10")
            .await
            .unwrap();
        storage
            .set_link_meta(link_id, meta_keys::TODAY_VISITORS, "4|2024-05-10")
            .await
            .unwrap();
        storage.insert_click(&click(link_id, "a", now)).await.unwrap();

        let counts = today.link_today_at(link_id, now).await.unwrap();
        assert_eq!(counts, TodayCounts { clicks: 1, visitors: 1 });
    }

    #[tokio::test]
    async fn test_platforms_cached_until_invalidated() {
        let (storage, today, _) = setup().await;
        assert_eq!(*today.platforms().await.unwrap(), vec!["Coupang".to_string()]);

        storage
            .create_link(&NewLink {
                slug: "today2".into(),
                target_url: "https://www.temu.com/goods.html".into(),
                platform: "Temu".into(),
                owner_id: None,
            })
            .await
            .unwrap();
        assert_eq!(today.platforms().await.unwrap().len(), 1);

        today.invalidate_platforms().await;
        assert_eq!(
            *today.platforms().await.unwrap(),
            vec!["Coupang".to_string(), "Temu".to_string()]
        );
    }
}
