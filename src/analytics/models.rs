//! Date ranges and the payloads produced by the analytics engine.

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime};
use serde::Serialize;
use thiserror::Error;

use crate::models::ShortLink;
use crate::storage::TimeBounds;

pub const MAX_RANGE_DAYS: i64 = 366;
pub const DEFAULT_RANGE: &str = "30d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("unknown range '{0}'; use today, yesterday, 7d, week, 30d, month or 90d")]
    UnknownPreset(String),
    #[error("'{0}' is not a YYYY-MM-DD date")]
    Unparseable(String),
    #[error("start_date and end_date must be given together")]
    Incomplete,
    #[error("start_date must not be after end_date")]
    Reversed,
    #[error("date range may span at most {MAX_RANGE_DAYS} days")]
    TooLong,
}

/// Inclusive range of local calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::Reversed);
        }
        let range = Self { start, end };
        if range.days() > MAX_RANGE_DAYS {
            return Err(DateRangeError::TooLong);
        }
        Ok(range)
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// The `days` local dates ending with `end`.
    pub fn ending(end: NaiveDate, days: u64) -> Self {
        let start = end
            .checked_sub_days(Days::new(days.saturating_sub(1)))
            .unwrap_or(end);
        Self { start, end }
    }

    pub fn from_preset(preset: &str, today: NaiveDate) -> Result<Self, DateRangeError> {
        match preset {
            "today" => Ok(Self::single(today)),
            "yesterday" => Ok(Self::single(today.pred_opt().unwrap_or(today))),
            "7d" | "week" => Ok(Self::ending(today, 7)),
            "30d" | "month" => Ok(Self::ending(today, 30)),
            "90d" => Ok(Self::ending(today, 90)),
            other => Err(DateRangeError::UnknownPreset(other.to_string())),
        }
    }

    /// Explicit dates win over a preset; with neither, the default preset applies.
    pub fn resolve(
        preset: Option<&str>,
        start_date: Option<&str>,
        end_date: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, DateRangeError> {
        match (start_date, end_date) {
            (Some(start), Some(end)) => Self::new(parse_date(start)?, parse_date(end)?),
            (None, None) => Self::from_preset(preset.unwrap_or(DEFAULT_RANGE), today),
            _ => Err(DateRangeError::Incomplete),
        }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Range of equal length ending the day before this one starts.
    pub fn previous(&self) -> Self {
        let end = self.start.pred_opt().unwrap_or(self.start);
        Self::ending(end, self.days() as u64)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        self.start.iter_days().take(self.days() as usize)
    }

    /// `[local midnight of start, local midnight after end)` in unix seconds.
    pub fn bounds(&self, offset: FixedOffset) -> TimeBounds {
        let after_end = self.end.succ_opt().unwrap_or(self.end);
        TimeBounds::new(day_start(self.start, offset), day_start(after_end, offset))
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, DateRangeError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| DateRangeError::Unparseable(raw.to_string()))
}

/// Unix seconds of local midnight starting `date`.
pub fn day_start(date: NaiveDate, offset: FixedOffset) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp() - i64::from(offset.local_minus_utc())
}

pub fn local_date(unix_secs: i64, offset: FixedOffset) -> NaiveDate {
    DateTime::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .with_timezone(&offset)
        .date_naive()
}

/// Days since 1970-01-01, matching the store's day bucket.
pub fn epoch_day(date: NaiveDate) -> i64 {
    (date - NaiveDate::default()).num_days()
}

/// Percentage change rounded to one decimal; from zero it is 100 or 0.
pub fn change_rate(current: i64, previous: i64) -> f64 {
    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    round_to((current - previous) as f64 / previous as f64 * 100.0, 1)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DynamicGrowth {
    pub current: i64,
    pub previous: i64,
    pub rate: f64,
    pub period_days: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlatformShare {
    pub platform: String,
    pub clicks: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopLink {
    pub id: i64,
    pub slug: String,
    pub target_url: String,
    pub platform: String,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WeekdayCount {
    pub weekday: &'static str,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReturningVisitors {
    pub new_visitors: i64,
    pub returning: i64,
    pub frequent: i64,
    pub total: i64,
    pub returning_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Anomaly {
    pub date: NaiveDate,
    pub clicks: i64,
    pub deviation: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct AnomalyReport {
    pub insufficient_data: bool,
    pub mean: f64,
    pub stddev: f64,
    pub spikes: Vec<Anomaly>,
    pub drops: Vec<Anomaly>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodSummary {
    pub clicks: i64,
    pub unique_visitors: i64,
    pub trend: Vec<DailyPoint>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComparisonDelta {
    pub clicks_change: i64,
    pub clicks_rate: f64,
    pub uv_change: i64,
    pub uv_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodComparison {
    pub current: PeriodSummary,
    pub previous: PeriodSummary,
    pub comparison: ComparisonDelta,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RefererStat {
    pub referer: String,
    pub clicks: i64,
    pub unique_visitors: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct RefererGroups {
    #[serde(rename = "Direct")]
    pub direct: i64,
    #[serde(rename = "SNS")]
    pub sns: i64,
    #[serde(rename = "Search")]
    pub search: i64,
    #[serde(rename = "Other")]
    pub other: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Breakdown {
    pub name: String,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkDetail {
    pub link: ShortLink,
    pub range: DateRange,
    pub total_clicks: i64,
    pub unique_visitors: i64,
    pub today_clicks: u64,
    pub today_visitors: u64,
    pub clicks_by_hour: Vec<i64>,
    pub daily_trend: Vec<DailyPoint>,
    pub referers: Vec<RefererStat>,
    pub devices: Vec<Breakdown>,
}

/// Payload of `GET /stats`.
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub range: DateRange,
    pub total_clicks: i64,
    pub unique_visitors: i64,
    pub growth_rate: f64,
    pub dynamic_growth: DynamicGrowth,
    pub active_links: i64,
    pub today_clicks: u64,
    pub today_visitors: u64,
    pub clicks_by_hour: Vec<i64>,
    pub platform_share: Vec<PlatformShare>,
    pub daily_trend: Vec<DailyPoint>,
    pub top_links: Vec<TopLink>,
    pub platforms: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefererReport {
    pub range: DateRange,
    pub referers: Vec<RefererStat>,
    pub groups: RefererGroups,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub range: DateRange,
    pub devices: Vec<Breakdown>,
    pub os: Vec<Breakdown>,
    pub browsers: Vec<Breakdown>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternReport {
    pub range: DateRange,
    pub weekday: Vec<WeekdayCount>,
    pub hourly: Vec<i64>,
    pub visitors: ReturningVisitors,
    pub anomalies: AnomalyReport,
}
