pub mod cached;
pub mod filter;
pub mod postgres;
mod rows;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedStorage;
pub use filter::{ClickFilter, Dimension, TimeBounds, TimeBucket};
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
