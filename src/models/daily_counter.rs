//! Versioned encoding of the per-link "today" counters kept in link meta.
//!
//! Older deployments wrote `"count|YYYY-MM-DD"`. Current writers emit a JSON
//! document carrying an explicit `version`. Reads accept both; writes always
//! produce the newest form.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CURRENT_VERSION: u32 = 2;

/// Current on-disk form of a daily counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounter {
    pub version: u32,
    pub count: u64,
    pub date: NaiveDate,
    /// Unix seconds of the recompute that produced `count`; 0 when migrated
    pub refreshed_at: i64,
}

impl DailyCounter {
    pub fn new(count: u64, date: NaiveDate, refreshed_at: i64) -> Self {
        Self {
            version: CURRENT_VERSION,
            count,
            date,
            refreshed_at,
        }
    }

    /// The count if it belongs to `date`, else zero.
    pub fn count_for(&self, date: NaiveDate) -> u64 {
        if self.date == date {
            self.count
        } else {
            0
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode daily counter")
    }
}

/// Every format a stored counter may be found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredDailyCounter {
    Legacy { count: u64, date: NaiveDate },
    V2(DailyCounter),
}

impl StoredDailyCounter {
    pub fn decode(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with('{') {
            let counter: DailyCounter =
                serde_json::from_str(raw).context("malformed daily counter document")?;
            if counter.version != CURRENT_VERSION {
                bail!("unsupported daily counter version {}", counter.version);
            }
            return Ok(StoredDailyCounter::V2(counter));
        }

        let (count, date) = raw
            .split_once('|')
            .ok_or_else(|| anyhow!("daily counter '{raw}' is neither JSON nor 'count|date'"))?;
        let count = count
            .trim()
            .parse::<u64>()
            .with_context(|| format!("bad legacy count in '{raw}'"))?;
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .with_context(|| format!("bad legacy date in '{raw}'"))?;
        Ok(StoredDailyCounter::Legacy { count, date })
    }

    pub fn is_current(&self) -> bool {
        matches!(self, StoredDailyCounter::V2(_))
    }

    pub fn migrate(self) -> DailyCounter {
        match self {
            StoredDailyCounter::Legacy { count, date } => DailyCounter::new(count, date, 0),
            StoredDailyCounter::V2(counter) => counter,
        }
    }
}
