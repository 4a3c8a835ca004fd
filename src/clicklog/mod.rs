//! Click logging for the redirect listener.
//!
//! Redirect handlers capture a [`ClickContext`] and hand it to the
//! [`ClickLogger`] actor, which runs up to `concurrency` recordings at once.
//! When the queue is full the click is recorded inline instead of dropped.

pub mod user_agent;

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::analytics::feed::ClickFeed;
use crate::cache::TodayStats;
use crate::config::ClickLoggerConfig;
use crate::models::click::{truncate_chars, MAX_REFERER_LEN, MAX_USER_AGENT_LEN};
use crate::models::{ClickEvent, NewClickEvent};
use crate::storage::Storage;

/// Everything about a visit that has to be captured before the response goes out.
#[derive(Debug, Clone)]
pub struct ClickContext {
    pub client_ip: IpAddr,
    pub link_id: i64,
    pub slug: String,
    pub platform: String,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub visited_at: i64,
}

/// hex(sha256(ip ‖ salt))
pub fn hash_ip(ip: &IpAddr, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.to_string().as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

fn clean_header(value: Option<String>, max: usize) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| truncate_chars(&v, max))
}

/// One unit of click logging: event row, counter, today cache, live feed.
pub struct ClickRecorder {
    storage: Arc<dyn Storage>,
    today: Arc<TodayStats>,
    feed: Arc<ClickFeed>,
    salt: String,
}

impl ClickRecorder {
    pub fn new(
        storage: Arc<dyn Storage>,
        today: Arc<TodayStats>,
        feed: Arc<ClickFeed>,
        salt: String,
    ) -> Self {
        Self {
            storage,
            today,
            feed,
            salt,
        }
    }

    pub async fn record(&self, ctx: ClickContext) -> Result<ClickEvent> {
        let agent = user_agent::parse(ctx.user_agent.as_deref());
        let event = NewClickEvent {
            link_id: ctx.link_id,
            visitor_ip_hash: hash_ip(&ctx.client_ip, &self.salt),
            platform: ctx.platform,
            referer: clean_header(ctx.referer, MAX_REFERER_LEN),
            user_agent: clean_header(ctx.user_agent, MAX_USER_AGENT_LEN),
            device: agent.device.to_string(),
            os: agent.os.to_string(),
            browser: agent.browser.to_string(),
            visited_at: ctx.visited_at,
        };

        let id = self.storage.insert_click(&event).await?;
        self.storage.increment_clicks(ctx.link_id).await?;

        if let Err(err) = self.today.refresh_link(ctx.link_id).await {
            error!(link_id = ctx.link_id, error = %err, "failed to refresh today counters");
        }

        let event = event.into_event(id);
        self.feed.publish(event.clone());
        debug!(slug = %ctx.slug, click_id = id, "click recorded");
        Ok(event)
    }

    /// `record` with failures logged instead of returned.
    pub async fn record_logged(&self, ctx: ClickContext) {
        let slug = ctx.slug.clone();
        if let Err(err) = self.record(ctx).await {
            error!(slug = %slug, error = %err, "failed to log click");
        }
    }
}

enum LoggerMessage {
    Log(ClickContext),
    /// Reply once everything queued before it has been recorded
    Flush(oneshot::Sender<()>),
    Shutdown,
}

struct ClickLoggerActor {
    receiver: mpsc::Receiver<LoggerMessage>,
    recorder: Arc<ClickRecorder>,
    in_flight: JoinSet<()>,
    concurrency: usize,
}

impl ClickLoggerActor {
    async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                LoggerMessage::Log(ctx) => {
                    while self.in_flight.len() >= self.concurrency {
                        self.reap_one().await;
                    }
                    let recorder = Arc::clone(&self.recorder);
                    self.in_flight.spawn(async move { recorder.record_logged(ctx).await });
                }
                LoggerMessage::Flush(done) => {
                    self.drain().await;
                    let _ = done.send(());
                }
                LoggerMessage::Shutdown => {
                    info!("click logger received shutdown signal, draining...");
                    break;
                }
            }
        }

        // anything still queued behind the shutdown message is recorded too
        self.receiver.close();
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                LoggerMessage::Log(ctx) => {
                    let recorder = Arc::clone(&self.recorder);
                    self.in_flight.spawn(async move { recorder.record_logged(ctx).await });
                }
                LoggerMessage::Flush(done) => {
                    let _ = done.send(());
                }
                LoggerMessage::Shutdown => {}
            }
        }
        self.drain().await;
        info!("click logger drained");
    }

    async fn reap_one(&mut self) {
        if let Some(Err(err)) = self.in_flight.join_next().await {
            error!(error = %err, "click logging task panicked");
        }
    }

    async fn drain(&mut self) {
        while !self.in_flight.is_empty() {
            self.reap_one().await;
        }
    }
}

/// Handle to the click logging worker.
pub struct ClickLogger {
    sender: mpsc::Sender<LoggerMessage>,
    recorder: Arc<ClickRecorder>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ClickLogger {
    pub fn spawn(recorder: Arc<ClickRecorder>, config: &ClickLoggerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let actor = ClickLoggerActor {
            receiver,
            recorder: Arc::clone(&recorder),
            in_flight: JoinSet::new(),
            concurrency: config.concurrency.max(1),
        };
        let worker = tokio::spawn(actor.run());

        Self {
            sender,
            recorder,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues a click; records it inline if the queue is full or closed.
    pub async fn log(&self, ctx: ClickContext) {
        match self.sender.try_send(LoggerMessage::Log(ctx)) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) | Err(TrySendError::Closed(msg)) => {
                warn!("click queue unavailable, logging synchronously");
                if let LoggerMessage::Log(ctx) = msg {
                    self.recorder.record_logged(ctx).await;
                }
            }
        }
    }

    pub async fn log_sync(&self, ctx: ClickContext) {
        self.recorder.record_logged(ctx).await;
    }

    /// Waits until every click queued so far has been recorded.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(LoggerMessage::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Stops accepting work and waits for in-flight clicks to finish.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(LoggerMessage::Shutdown).await;
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(err) = worker.await {
                error!(error = %err, "click logger worker failed");
            }
        }
    }
}
