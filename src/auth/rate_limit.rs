use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::storage::unix_now;

/// Rejection from the limiter, carrying the `Retry-After` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    window_start: i64,
}

/// Fixed-window request counter per source IP.
pub struct RateLimiter {
    windows: DashMap<IpAddr, Window>,
    max_requests: u32,
    window_secs: i64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: i64) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window_secs: window_secs.max(1),
        }
    }

    pub fn check(&self, ip: IpAddr) -> Result<(), RateLimited> {
        self.check_at(ip, unix_now())
    }

    /// Counts one request at `now`. The shard lock is held for the whole
    /// read-modify-write so concurrent requests never lose an increment.
    pub fn check_at(&self, ip: IpAddr, now: i64) -> Result<(), RateLimited> {
        let mut window = self.windows.entry(ip).or_insert(Window {
            count: 0,
            window_start: now,
        });

        if now - window.window_start >= self.window_secs {
            window.count = 0;
            window.window_start = now;
        }

        if window.count >= self.max_requests {
            let remaining = window.window_start + self.window_secs - now;
            return Err(RateLimited {
                retry_after_secs: remaining.max(1) as u64,
            });
        }

        window.count += 1;
        Ok(())
    }

    /// Drops windows that ended before `now`, returning how many were removed.
    pub fn sweep(&self, now: i64) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now - window.window_start < self.window_secs);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = self.sweep(unix_now());
                if removed > 0 {
                    tracing::debug!(removed, "swept stale rate-limit windows");
                }
            }
        })
    }
}
