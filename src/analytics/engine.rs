//! Read-only analytics over the click event store.

use anyhow::Result;
use chrono::{Days, FixedOffset, NaiveDate};
use statrs::statistics::Statistics;
use std::collections::HashMap;
use std::sync::Arc;

use super::models::{
    change_rate, day_start, epoch_day, local_date, round_to, Anomaly, AnomalyReport, Breakdown,
    ComparisonDelta, DailyPoint, DateRange, DeviceReport, DynamicGrowth, LinkDetail, Overview,
    PatternReport, PeriodComparison, PeriodSummary, PlatformShare, RefererGroups, RefererReport,
    RefererStat, ReturningVisitors, TopLink, WeekdayCount,
};
use super::referer;
use crate::cache::TodayStats;
use crate::config::AnalyticsConfig;
use crate::storage::filter::VisitorActivity;
use crate::storage::{unix_now, ClickFilter, Dimension, Storage, TimeBounds, TimeBucket};

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Visits in range at which a visitor counts as frequent
pub const FREQUENT_VISITS: i64 = 6;
pub const MIN_ANOMALY_DAYS: usize = 7;
pub const DEFAULT_TOP_LINKS: i64 = 10;
pub const DEFAULT_REFERER_LIMIT: usize = 20;

pub struct AnalyticsEngine {
    storage: Arc<dyn Storage>,
    today: Arc<TodayStats>,
    offset: FixedOffset,
    anomaly_sigma: f64,
    lookback_days: u64,
}

impl AnalyticsEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        today: Arc<TodayStats>,
        config: &AnalyticsConfig,
    ) -> Self {
        Self {
            storage,
            today,
            offset: config.offset(),
            anomaly_sigma: config.anomaly_threshold_sigma,
            lookback_days: config.returning_lookback_days.max(0) as u64,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn offset_secs(&self) -> i64 {
        i64::from(self.offset.local_minus_utc())
    }

    /// Today's local date.
    pub fn today(&self) -> NaiveDate {
        local_date(unix_now(), self.offset)
    }

    fn filter(&self, range: &DateRange, platform: Option<&str>) -> ClickFilter {
        ClickFilter::new(range.bounds(self.offset)).with_platform(platform)
    }

    pub async fn total_clicks(&self, range: &DateRange, platform: Option<&str>) -> Result<i64> {
        self.storage.count_clicks(&self.filter(range, platform)).await
    }

    pub async fn unique_visitors(&self, range: &DateRange, platform: Option<&str>) -> Result<i64> {
        self.storage
            .count_unique_visitors(&self.filter(range, platform))
            .await
    }

    /// Today against yesterday.
    pub async fn growth_rate(&self, today: NaiveDate, platform: Option<&str>) -> Result<f64> {
        let current = self.total_clicks(&DateRange::single(today), platform).await?;
        let yesterday = today.pred_opt().unwrap_or(today);
        let previous = self
            .total_clicks(&DateRange::single(yesterday), platform)
            .await?;
        Ok(change_rate(current, previous))
    }

    /// `range` against the equally long range right before it.
    pub async fn dynamic_growth_rate(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<DynamicGrowth> {
        let current = self.total_clicks(range, platform).await?;
        let previous = self.total_clicks(&range.previous(), platform).await?;
        Ok(DynamicGrowth {
            current,
            previous,
            rate: change_rate(current, previous),
            period_days: range.days(),
        })
    }

    pub async fn clicks_by_hour(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<Vec<i64>> {
        self.hourly(&self.filter(range, platform)).await
    }

    async fn hourly(&self, filter: &ClickFilter) -> Result<Vec<i64>> {
        let mut hours = vec![0; 24];
        for (hour, clicks) in self
            .storage
            .bucket_counts(filter, TimeBucket::HourOfDay, self.offset_secs())
            .await?
        {
            if let Some(slot) = usize::try_from(hour).ok().and_then(|h| hours.get_mut(h)) {
                *slot += clicks;
            }
        }
        Ok(hours)
    }

    pub async fn daily_trend(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<Vec<DailyPoint>> {
        self.trend(range, &self.filter(range, platform)).await
    }

    async fn trend(&self, range: &DateRange, filter: &ClickFilter) -> Result<Vec<DailyPoint>> {
        let by_day: HashMap<i64, i64> = self
            .storage
            .bucket_counts(filter, TimeBucket::Day, self.offset_secs())
            .await?
            .into_iter()
            .collect();

        Ok(range
            .dates()
            .map(|date| DailyPoint {
                date,
                clicks: by_day.get(&epoch_day(date)).copied().unwrap_or(0),
            })
            .collect())
    }

    pub async fn platform_share(&self, range: &DateRange) -> Result<Vec<PlatformShare>> {
        let counts = self
            .storage
            .dimension_counts(&self.filter(range, None), Dimension::Platform)
            .await?;
        let total: i64 = counts.iter().map(|(_, clicks)| clicks).sum();

        Ok(counts
            .into_iter()
            .map(|(platform, clicks)| PlatformShare {
                percentage: if total > 0 {
                    round_to(clicks as f64 / total as f64 * 100.0, 1)
                } else {
                    0.0
                },
                platform,
                clicks,
            })
            .collect())
    }

    /// Busiest links in range; links deleted since are left out.
    pub async fn top_links(
        &self,
        range: &DateRange,
        platform: Option<&str>,
        limit: i64,
    ) -> Result<Vec<TopLink>> {
        let counts = self
            .storage
            .top_link_counts(&self.filter(range, platform), limit)
            .await?;
        let ids: Vec<i64> = counts.iter().map(|(id, _)| *id).collect();
        let links: HashMap<i64, _> = self
            .storage
            .get_links_by_ids(&ids)
            .await?
            .into_iter()
            .map(|link| (link.id, link))
            .collect();

        Ok(counts
            .into_iter()
            .filter_map(|(id, clicks)| {
                let link = links.get(&id)?;
                Some(TopLink {
                    id,
                    slug: link.slug.clone(),
                    target_url: link.target_url.clone(),
                    platform: link.platform.clone(),
                    clicks,
                })
            })
            .collect())
    }

    /// Seven entries, Sunday first.
    pub async fn weekday_pattern(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<Vec<WeekdayCount>> {
        let mut days = [0i64; 7];
        for (weekday, clicks) in self
            .storage
            .bucket_counts(&self.filter(range, platform), TimeBucket::Weekday, self.offset_secs())
            .await?
        {
            if let Some(slot) = usize::try_from(weekday).ok().and_then(|d| days.get_mut(d)) {
                *slot += clicks;
            }
        }

        Ok(WEEKDAYS
            .into_iter()
            .zip(days)
            .map(|(weekday, clicks)| WeekdayCount { weekday, clicks })
            .collect())
    }

    pub async fn returning_visitors(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<ReturningVisitors> {
        let range_bounds = range.bounds(self.offset);
        let history_start = range
            .start
            .checked_sub_days(Days::new(self.lookback_days))
            .unwrap_or(range.start);
        let filter = ClickFilter::new(TimeBounds::new(
            day_start(history_start, self.offset),
            range_bounds.end,
        ))
        .with_platform(platform);

        let activity = self
            .storage
            .visitor_activity(&filter, range_bounds.start, self.offset_secs())
            .await?;
        Ok(classify_visitors(&activity))
    }

    pub async fn anomalies(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<AnomalyReport> {
        let trend = self.daily_trend(range, platform).await?;
        Ok(detect_anomalies(&trend, self.anomaly_sigma))
    }

    async fn period_summary(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<PeriodSummary> {
        Ok(PeriodSummary {
            clicks: self.total_clicks(range, platform).await?,
            unique_visitors: self.unique_visitors(range, platform).await?,
            trend: self.daily_trend(range, platform).await?,
            start: range.start,
            end: range.end,
        })
    }

    pub async fn period_comparison(
        &self,
        current: &DateRange,
        previous: &DateRange,
        platform: Option<&str>,
    ) -> Result<PeriodComparison> {
        let current = self.period_summary(current, platform).await?;
        let previous = self.period_summary(previous, platform).await?;
        let comparison = ComparisonDelta {
            clicks_change: current.clicks - previous.clicks,
            clicks_rate: change_rate(current.clicks, previous.clicks),
            uv_change: current.unique_visitors - previous.unique_visitors,
            uv_rate: change_rate(current.unique_visitors, previous.unique_visitors),
        };
        Ok(PeriodComparison {
            current,
            previous,
            comparison,
        })
    }

    pub async fn referer_stats(
        &self,
        range: &DateRange,
        platform: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RefererStat>> {
        let rows = self
            .storage
            .referer_visitor_counts(&self.filter(range, platform))
            .await?;
        Ok(referer::referer_stats(&rows, limit))
    }

    pub async fn referer_groups(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<RefererGroups> {
        let rows = self
            .storage
            .referer_visitor_counts(&self.filter(range, platform))
            .await?;
        Ok(referer::referer_groups(&rows))
    }

    async fn breakdown(
        &self,
        filter: &ClickFilter,
        dimension: Dimension,
    ) -> Result<Vec<Breakdown>> {
        Ok(self
            .storage
            .dimension_counts(filter, dimension)
            .await?
            .into_iter()
            .map(|(name, clicks)| Breakdown { name, clicks })
            .collect())
    }

    pub async fn device_stats(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<Vec<Breakdown>> {
        self.breakdown(&self.filter(range, platform), Dimension::Device)
            .await
    }

    pub async fn os_stats(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<Vec<Breakdown>> {
        self.breakdown(&self.filter(range, platform), Dimension::Os)
            .await
    }

    pub async fn browser_stats(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<Vec<Breakdown>> {
        self.breakdown(&self.filter(range, platform), Dimension::Browser)
            .await
    }

    /// `None` when the link does not exist.
    pub async fn link_detailed_stats(
        &self,
        link_id: i64,
        range: &DateRange,
    ) -> Result<Option<LinkDetail>> {
        let Some(link) = self.storage.get_link(link_id).await? else {
            return Ok(None);
        };
        let filter = self.filter(range, None).with_link(link_id);
        let today = self.today.link_today(link_id).await?;
        let rows = self.storage.referer_visitor_counts(&filter).await?;

        Ok(Some(LinkDetail {
            range: *range,
            total_clicks: self.storage.count_clicks(&filter).await?,
            unique_visitors: self.storage.count_unique_visitors(&filter).await?,
            today_clicks: today.clicks,
            today_visitors: today.visitors,
            clicks_by_hour: self.hourly(&filter).await?,
            daily_trend: self.trend(range, &filter).await?,
            referers: referer::referer_stats(&rows, DEFAULT_REFERER_LIMIT),
            devices: self.breakdown(&filter, Dimension::Device).await?,
            link,
        }))
    }

    pub async fn available_platforms(&self) -> Result<Arc<Vec<String>>> {
        self.today.platforms().await
    }

    pub async fn overview(&self, range: &DateRange, platform: Option<&str>) -> Result<Overview> {
        let today = self.today.global_today().await?;
        Ok(Overview {
            range: *range,
            total_clicks: self.total_clicks(range, platform).await?,
            unique_visitors: self.unique_visitors(range, platform).await?,
            growth_rate: self.growth_rate(self.today(), platform).await?,
            dynamic_growth: self.dynamic_growth_rate(range, platform).await?,
            active_links: self.storage.count_links().await?,
            today_clicks: today.clicks,
            today_visitors: today.visitors,
            clicks_by_hour: self.clicks_by_hour(range, platform).await?,
            platform_share: self.platform_share(range).await?,
            daily_trend: self.daily_trend(range, platform).await?,
            top_links: self.top_links(range, platform, DEFAULT_TOP_LINKS).await?,
            platforms: self.available_platforms().await?.as_ref().clone(),
        })
    }

    pub async fn referer_report(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<RefererReport> {
        let rows = self
            .storage
            .referer_visitor_counts(&self.filter(range, platform))
            .await?;
        Ok(RefererReport {
            range: *range,
            referers: referer::referer_stats(&rows, DEFAULT_REFERER_LIMIT),
            groups: referer::referer_groups(&rows),
        })
    }

    pub async fn device_report(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<DeviceReport> {
        Ok(DeviceReport {
            range: *range,
            devices: self.device_stats(range, platform).await?,
            os: self.os_stats(range, platform).await?,
            browsers: self.browser_stats(range, platform).await?,
        })
    }

    pub async fn pattern_report(
        &self,
        range: &DateRange,
        platform: Option<&str>,
    ) -> Result<PatternReport> {
        Ok(PatternReport {
            range: *range,
            weekday: self.weekday_pattern(range, platform).await?,
            hourly: self.clicks_by_hour(range, platform).await?,
            visitors: self.returning_visitors(range, platform).await?,
            anomalies: self.anomalies(range, platform).await?,
        })
    }
}

/// Splits visitors into new, returning and frequent. The three are disjoint.
pub fn classify_visitors(activity: &[VisitorActivity]) -> ReturningVisitors {
    let mut report = ReturningVisitors {
        new_visitors: 0,
        returning: 0,
        frequent: 0,
        total: activity.len() as i64,
        returning_rate: 0.0,
    };
    for visitor in activity {
        if visitor.visits_in_range >= FREQUENT_VISITS {
            report.frequent += 1;
        } else if visitor.active_days >= 2 {
            report.returning += 1;
        } else {
            report.new_visitors += 1;
        }
    }
    if report.total > 0 {
        report.returning_rate = round_to(
            (report.returning + report.frequent) as f64 / report.total as f64 * 100.0,
            1,
        );
    }
    report
}

/// Days beyond `sigma` population standard deviations from the mean.
pub fn detect_anomalies(trend: &[DailyPoint], sigma: f64) -> AnomalyReport {
    if trend.len() < MIN_ANOMALY_DAYS {
        return AnomalyReport {
            insufficient_data: true,
            ..AnomalyReport::default()
        };
    }

    let values: Vec<f64> = trend.iter().map(|p| p.clicks as f64).collect();
    let mean = values.iter().mean();
    let stddev = values.iter().population_std_dev();
    let mut report = AnomalyReport {
        insufficient_data: false,
        mean: round_to(mean, 1),
        stddev: round_to(stddev, 1),
        spikes: Vec::new(),
        drops: Vec::new(),
    };
    if stddev.is_nan() || stddev <= 0.0 {
        return report;
    }

    let upper = mean + sigma * stddev;
    let lower = (mean - sigma * stddev).max(0.0);
    for point in trend {
        let clicks = point.clicks as f64;
        let anomaly = || Anomaly {
            date: point.date,
            clicks: point.clicks,
            deviation: round_to((clicks - mean) / stddev, 2),
        };
        if clicks > upper {
            report.spikes.push(anomaly());
        } else if point.clicks > 0 && clicks < lower {
            report.drops.push(anomaly());
        }
    }
    report
}
