use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Roll-up of one local calendar day, written by the daily aggregation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub stats_date: NaiveDate,
    pub total_clicks: i64,
    pub unique_visitors: i64,
    pub platform_share: BTreeMap<String, i64>,
    pub referers: BTreeMap<String, i64>,
    pub updated_at: i64,
}
