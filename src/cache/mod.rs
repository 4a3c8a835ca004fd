pub mod tagged;
pub mod today;

pub use tagged::TaggedCache;
pub use today::{TodayCounts, TodayStats};
