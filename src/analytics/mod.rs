//! Click analytics: range queries, the daily roll-up job and the live feed.

pub mod aggregation;
pub mod engine;
pub mod feed;
pub mod models;
pub mod referer;

pub use aggregation::DailyAggregator;
pub use engine::AnalyticsEngine;
pub use feed::{ClickFeed, FeedMessage};
pub use models::{DateRange, DateRangeError};
