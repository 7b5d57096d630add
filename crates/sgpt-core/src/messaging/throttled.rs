use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChannelId, MessageRef, Ts, UserId},
    messaging::{
        port::MessagingPort,
        types::{HistoryMessage, MessageBody, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* Web API calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between calls per channel (chat.postMessage is ~1/sec/channel).
    pub per_channel_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(20),
            per_channel_min_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// Per-channel limiters. A limiter whose next slot has passed is dropped,
/// since a fresh one behaves the same.
#[derive(Debug)]
struct ChannelLimiters {
    interval: Duration,
    limiters: HashMap<String, IntervalLimiter>,
}

impl ChannelLimiters {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            limiters: HashMap::new(),
        }
    }

    fn reserve(&mut self, channel: &ChannelId) -> Duration {
        let now = Instant::now();
        self.limiters.retain(|_, lim| lim.next > now);
        let interval = self.interval;
        self.limiters
            .entry(channel.0.clone())
            .or_insert_with(|| IntervalLimiter::new(interval))
            .reserve()
    }
}

/// MessagingPort decorator that paces outbound calls.
///
/// Calls are delayed, never retried; a rate-limit error from the API still
/// surfaces as a delivery error.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    global: Mutex<IntervalLimiter>,
    per_channel: Mutex<ChannelLimiters>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_channel: Mutex::new(ChannelLimiters::new(cfg.per_channel_min_interval)),
        }
    }

    async fn throttle_channel(&self, channel: &ChannelId) {
        let global_wait = { self.global.lock().await.reserve() };
        let channel_wait = { self.per_channel.lock().await.reserve(channel) };

        let wait = global_wait.max(channel_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn post_message(
        &self,
        channel: &ChannelId,
        thread: Option<&Ts>,
        body: &MessageBody,
    ) -> Result<MessageRef> {
        self.throttle_channel(channel).await;
        self.inner.post_message(channel, thread, body).await
    }

    async fn update_message(&self, msg: &MessageRef, body: &MessageBody) -> Result<()> {
        self.throttle_channel(&msg.channel).await;
        self.inner.update_message(msg, body).await
    }

    async fn post_ephemeral(&self, channel: &ChannelId, user: &UserId, text: &str) -> Result<()> {
        self.throttle_channel(channel).await;
        self.inner.post_ephemeral(channel, user, text).await
    }

    async fn thread_replies(
        &self,
        channel: &ChannelId,
        thread: &Ts,
    ) -> Result<Vec<HistoryMessage>> {
        // History reads have their own tier; only global spacing applies.
        self.throttle_global().await;
        self.inner.thread_replies(channel, thread).await
    }
}
