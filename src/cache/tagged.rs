use dashmap::DashMap;
use moka::future::Cache;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

/// Moka cache whose entries can be dropped in groups by tag.
///
/// The tag index may briefly list keys that already expired; invalidating
/// those is a no-op.
pub struct TaggedCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    entries: Cache<String, V>,
    tags: DashMap<String, HashSet<String>>,
}

impl<V> TaggedCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            tags: DashMap::new(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).await
    }

    pub async fn insert(&self, key: &str, value: V, tags: &[&str]) {
        for tag in tags {
            self.tags
                .entry((*tag).to_string())
                .or_default()
                .insert(key.to_string());
        }
        self.entries.insert(key.to_string(), value).await;
    }

    /// Cache-aside read: on a miss the loader runs and its value is stored
    /// under `tags`. Loader errors are returned and nothing is cached.
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, tags: &[&str], load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = load().await?;
        self.insert(key, value.clone(), tags).await;
        Ok(value)
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    /// Drops every entry inserted under `tag`.
    pub async fn invalidate_tag(&self, tag: &str) {
        let Some((_, keys)) = self.tags.remove(tag) else {
            return;
        };
        for key in keys {
            self.entries.invalidate(&key).await;
        }
    }
}
