//! Live click feed.
//!
//! Each owner has at most one active stream. Opening a new one takes over the
//! `feed:{owner}` lease; the older stream sees it on its next heartbeat and
//! ends with `SessionReplaced`. Every stream is capped at `max_duration`.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, sleep, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::config::FeedConfig;
use crate::lease::LeaseTable;
use crate::models::ClickEvent;
use crate::storage::Storage;

pub const BACKLOG_SIZE: i64 = 5;
const CATCH_UP_BATCH: i64 = 100;
const CHANNEL_CAPACITY: usize = 1024;
const STREAM_BUFFER: usize = 64;

/// What a subscriber sees of a click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedClick {
    pub id: i64,
    pub link_id: i64,
    pub platform: String,
    pub referer: Option<String>,
    pub device: String,
    pub os: String,
    pub browser: String,
    pub visited_at: i64,
}

impl From<&ClickEvent> for FeedClick {
    fn from(event: &ClickEvent) -> Self {
        Self {
            id: event.id,
            link_id: event.link_id,
            platform: event.platform.clone(),
            referer: event.referer.clone(),
            device: event.device.clone(),
            os: event.os.clone(),
            browser: event.browser.clone(),
            visited_at: event.visited_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Click(FeedClick),
    Heartbeat,
    /// Another stream for the same owner took over
    SessionReplaced,
    /// The duration cap was reached
    Closed,
}

pub struct ClickFeed {
    storage: Arc<dyn Storage>,
    sender: broadcast::Sender<Arc<ClickEvent>>,
    leases: Arc<LeaseTable>,
    max_duration: Duration,
    lock_ttl: Duration,
    heartbeat: Duration,
}

struct StreamState {
    lease: String,
    token: u64,
    platform: Option<String>,
    /// Events at or below this id were already delivered
    floor: i64,
    /// Highest id delivered so far
    high_water: i64,
}

impl ClickFeed {
    pub fn new(storage: Arc<dyn Storage>, leases: Arc<LeaseTable>, config: &FeedConfig) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            storage,
            sender,
            leases,
            max_duration: Duration::from_secs(config.max_duration_secs),
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            heartbeat: Duration::from_secs(config.heartbeat_secs.max(1)),
        }
    }

    pub fn publish(&self, event: ClickEvent) {
        // an error only means nobody is listening
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Opens a stream for `owner_id`, replacing any stream that owner already has.
    pub async fn subscribe(
        self: &Arc<Self>,
        owner_id: i64,
        platform: Option<String>,
    ) -> Result<ReceiverStream<FeedMessage>> {
        let lease = format!("feed:{owner_id}");
        let token = self.leases.take_over(&lease, self.lock_ttl);

        // subscribe before reading the backlog so nothing falls in between
        let receiver = self.sender.subscribe();
        let backlog = self
            .storage
            .recent_clicks(None, platform.as_deref(), BACKLOG_SIZE)
            .await?;
        let floor = match backlog.last() {
            Some(event) => event.id,
            None => self.storage.latest_click_id().await?,
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let state = StreamState {
            lease,
            token,
            platform,
            floor,
            high_water: floor,
        };
        let feed = Arc::clone(self);
        tokio::spawn(async move {
            feed.run_stream(state, receiver, backlog, tx).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn run_stream(
        self: Arc<Self>,
        mut state: StreamState,
        mut receiver: broadcast::Receiver<Arc<ClickEvent>>,
        backlog: Vec<ClickEvent>,
        tx: mpsc::Sender<FeedMessage>,
    ) {
        for event in &backlog {
            if tx.send(FeedMessage::Click(event.into())).await.is_err() {
                self.leases.release(&state.lease, state.token);
                return;
            }
        }

        let deadline = sleep(self.max_duration);
        tokio::pin!(deadline);
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    let _ = tx.send(FeedMessage::Closed).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    if !self.leases.is_current(&state.lease, state.token) {
                        debug!(lease = %state.lease, "feed stream replaced");
                        let _ = tx.send(FeedMessage::SessionReplaced).await;
                        // the lease belongs to the newer stream now
                        return;
                    }
                    self.leases.renew(&state.lease, state.token, self.lock_ttl);
                    if tx.send(FeedMessage::Heartbeat).await.is_err() {
                        break;
                    }
                }
                received = receiver.recv() => match received {
                    Ok(event) => {
                        if !self.deliver(&mut state, &event, &tx).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "feed subscriber lagged, catching up from the store");
                        if !self.catch_up(&mut state, &tx).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tx.closed() => break,
            }
        }

        self.leases.release(&state.lease, state.token);
    }

    /// Returns false once the subscriber is gone.
    async fn deliver(
        &self,
        state: &mut StreamState,
        event: &ClickEvent,
        tx: &mpsc::Sender<FeedMessage>,
    ) -> bool {
        if event.id <= state.floor {
            return true;
        }
        if let Some(platform) = state.platform.as_deref() {
            if event.platform != platform {
                return true;
            }
        }
        state.high_water = state.high_water.max(event.id);
        tx.send(FeedMessage::Click(event.into())).await.is_ok()
    }

    async fn catch_up(&self, state: &mut StreamState, tx: &mpsc::Sender<FeedMessage>) -> bool {
        loop {
            let batch = match self
                .storage
                .recent_clicks(Some(state.high_water), state.platform.as_deref(), CATCH_UP_BATCH)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, "feed catch-up failed");
                    return true;
                }
            };
            let done = (batch.len() as i64) < CATCH_UP_BATCH;
            for event in &batch {
                state.high_water = state.high_water.max(event.id);
                if tx.send(FeedMessage::Click(event.into())).await.is_err() {
                    return false;
                }
            }
            // anything still queued in the channel up to here is a duplicate
            state.floor = state.high_water;
            if done {
                return true;
            }
        }
    }
}
