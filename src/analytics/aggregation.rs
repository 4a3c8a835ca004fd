//! Daily roll-up of click events into `daily_stats`.
//!
//! The scheduler rolls up yesterday at the configured local time. Because a
//! process may be down at that moment, `check_missed` also runs at startup
//! and from API middleware, catching up on every day after the stored marker.

use anyhow::Result;
use chrono::{Days, FixedOffset, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::models::{local_date, DateRange};
use super::referer;
use crate::config::AnalyticsConfig;
use crate::lease::LeaseTable;
use crate::models::DailyStats;
use crate::settings::SettingsService;
use crate::storage::{unix_now, ClickFilter, Dimension, Storage};

pub const LEASE_NAME: &str = "daily_aggregation";
const LEASE_TTL: Duration = Duration::from_secs(300);
pub const MAX_CATCH_UP_DAYS: u64 = 31;
const CHECK_INTERVAL_SECS: i64 = 60;

pub struct DailyAggregator {
    storage: Arc<dyn Storage>,
    settings: Arc<SettingsService>,
    leases: Arc<LeaseTable>,
    offset: FixedOffset,
    run_at: NaiveTime,
    last_check: AtomicI64,
}

impl DailyAggregator {
    pub fn new(
        storage: Arc<dyn Storage>,
        settings: Arc<SettingsService>,
        leases: Arc<LeaseTable>,
        config: &AnalyticsConfig,
    ) -> Self {
        Self {
            storage,
            settings,
            leases,
            offset: config.offset(),
            run_at: config.aggregation_time,
            last_check: AtomicI64::new(i64::MIN),
        }
    }

    pub fn today(&self) -> NaiveDate {
        local_date(unix_now(), self.offset)
    }

    /// Computes and upserts the row for `date`. Running it twice yields the same row.
    pub async fn aggregate_day(&self, date: NaiveDate) -> Result<DailyStats> {
        let filter = ClickFilter::new(DateRange::single(date).bounds(self.offset));

        let platform_share: BTreeMap<String, i64> = self
            .storage
            .dimension_counts(&filter, Dimension::Platform)
            .await?
            .into_iter()
            .collect();

        let groups = referer::referer_groups(&self.storage.referer_visitor_counts(&filter).await?);
        let referers = BTreeMap::from([
            ("Direct".to_string(), groups.direct),
            ("SNS".to_string(), groups.sns),
            ("Search".to_string(), groups.search),
            ("Other".to_string(), groups.other),
        ]);

        let stats = DailyStats {
            stats_date: date,
            total_clicks: self.storage.count_clicks(&filter).await?,
            unique_visitors: self.storage.count_unique_visitors(&filter).await?,
            platform_share,
            referers,
            updated_at: unix_now(),
        };
        self.storage.upsert_daily_stats(&stats).await?;
        debug!(date = %date, clicks = stats.total_clicks, "daily stats aggregated");
        Ok(stats)
    }

    /// Throttled entry point for request middleware; runs at most once a minute.
    pub async fn check_missed(&self, today: NaiveDate) -> Result<usize> {
        let now = unix_now();
        let last = self.last_check.load(Ordering::Relaxed);
        if now.saturating_sub(last) < CHECK_INTERVAL_SECS {
            return Ok(0);
        }
        if self
            .last_check
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return Ok(0);
        }
        self.catch_up(today).await
    }

    /// Aggregates every day after the marker up to yesterday, oldest first,
    /// at most [`MAX_CATCH_UP_DAYS`] back. Returns the number of days written.
    pub async fn catch_up(&self, today: NaiveDate) -> Result<usize> {
        let Some(yesterday) = today.pred_opt() else {
            return Ok(0);
        };
        let marker = self.settings.last_aggregation_date().await?;
        if marker.is_some_and(|marker| marker >= yesterday) {
            return Ok(0);
        }

        let earliest = today
            .checked_sub_days(Days::new(MAX_CATCH_UP_DAYS))
            .unwrap_or(yesterday);
        let start = match marker.and_then(|marker| marker.succ_opt()) {
            Some(next) => next.max(earliest),
            // fresh install: nothing before yesterday was ever due
            None => yesterday,
        };

        let Some(token) = self.leases.acquire(LEASE_NAME, LEASE_TTL) else {
            debug!("daily aggregation already running elsewhere");
            return Ok(0);
        };
        let result = self.aggregate_range(start, yesterday).await;
        self.leases.release(LEASE_NAME, token);

        if let Ok(days) = result {
            if days > 0 {
                info!(
                    from = %start,
                    to = %yesterday,
                    days,
                    "caught up on missed daily aggregation"
                );
            }
        }
        result
    }

    /// Stops at the first failing day; the marker stays on the last success.
    async fn aggregate_range(&self, start: NaiveDate, end: NaiveDate) -> Result<usize> {
        let mut done = 0;
        for date in start.iter_days().take_while(|date| *date <= end) {
            if let Err(err) = self.aggregate_day(date).await {
                error!(date = %date, error = %err, "daily aggregation failed");
                break;
            }
            self.settings.set_last_aggregation_date(date).await?;
            done += 1;
        }
        Ok(done)
    }

    /// Re-aggregates yesterday so late clicks are included, then fills any gap.
    pub async fn run_scheduled(&self, today: NaiveDate) -> Result<()> {
        let Some(yesterday) = today.pred_opt() else {
            return Ok(());
        };
        self.catch_up(today).await?;

        let Some(token) = self.leases.acquire(LEASE_NAME, LEASE_TTL) else {
            return Ok(());
        };
        let result = self.aggregate_day(yesterday).await.map(|_| ());
        self.leases.release(LEASE_NAME, token);
        result
    }

    fn until_next_run(&self) -> Duration {
        let now = Utc::now().with_timezone(&self.offset).naive_local();
        let mut next = now.date().and_time(self.run_at);
        if next <= now {
            next += chrono::Duration::days(1);
        }
        (next - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn spawn_scheduler(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let wait = self.until_next_run();
                debug!(wait_secs = wait.as_secs(), "next daily aggregation scheduled");
                tokio::time::sleep(wait).await;

                let today = self.today();
                match self.run_scheduled(today).await {
                    Ok(()) => info!(date = %today, "scheduled daily aggregation finished"),
                    Err(err) => warn!(error = %err, "scheduled daily aggregation failed"),
                }
            }
        })
    }
}
