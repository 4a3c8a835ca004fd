//! Named, expiring, in-process leases.
//!
//! A lease is held by whoever owns its current token. Tokens come from a
//! monotonic counter, so a holder that was taken over can always tell.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Holder {
    token: u64,
    expires_at: Instant,
}

#[derive(Default)]
pub struct LeaseTable {
    leases: DashMap<String, Holder>,
    next_token: AtomicU64,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Takes the lease only if nobody holds it or the holder expired.
    pub fn acquire(&self, name: &str, ttl: Duration) -> Option<u64> {
        let now = Instant::now();
        match self.leases.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return None;
                }
                let token = self.mint();
                occupied.insert(Holder {
                    token,
                    expires_at: now + ttl,
                });
                Some(token)
            }
            Entry::Vacant(vacant) => {
                let token = self.mint();
                vacant.insert(Holder {
                    token,
                    expires_at: now + ttl,
                });
                Some(token)
            }
        }
    }

    /// Takes the lease unconditionally; the previous holder loses it.
    pub fn take_over(&self, name: &str, ttl: Duration) -> u64 {
        let token = self.mint();
        self.leases.insert(
            name.to_string(),
            Holder {
                token,
                expires_at: Instant::now() + ttl,
            },
        );
        token
    }

    /// True while `token` holds an unexpired lease on `name`.
    pub fn is_current(&self, name: &str, token: u64) -> bool {
        self.leases
            .get(name)
            .is_some_and(|holder| holder.token == token && holder.expires_at > Instant::now())
    }

    /// Extends the lease if `token` still holds it.
    pub fn renew(&self, name: &str, token: u64, ttl: Duration) -> bool {
        match self.leases.get_mut(name) {
            Some(mut holder) if holder.token == token => {
                holder.expires_at = Instant::now() + ttl;
                true
            }
            _ => false,
        }
    }

    /// Drops the lease if `token` still holds it.
    pub fn release(&self, name: &str, token: u64) -> bool {
        self.leases
            .remove_if(name, |_, holder| holder.token == token)
            .is_some()
    }
}
