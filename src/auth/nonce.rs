use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Nonces already presented within the replay window.
///
/// Entries live for twice the timestamp tolerance: a request stamped at the
/// edge of the window must still find its nonce marked until the timestamp
/// itself stops being acceptable.
#[derive(Clone)]
pub struct NonceCache {
    seen: Cache<String, i64>,
}

impl NonceCache {
    pub fn new(tolerance_secs: i64) -> Self {
        let ttl = Duration::from_secs((tolerance_secs.max(1) as u64) * 2);
        Self {
            seen: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Atomically marks the nonce as used. Returns `false` when it was already
    /// present, so of several concurrent identical requests exactly one wins.
    pub async fn check_and_mark(&self, api_key: &str, nonce: &str, timestamp: i64) -> bool {
        self.seen
            .entry(nonce_key(api_key, nonce))
            .or_insert(timestamp)
            .await
            .is_fresh()
    }
}

fn nonce_key(api_key: &str, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(b":");
    hasher.update(nonce.as_bytes());
    hex::encode(hasher.finalize())
}
