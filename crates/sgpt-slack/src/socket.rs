//! Socket Mode connection: open, read, ack, forward, reconnect.

use std::time::{Duration, SystemTime};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sgpt_core::{errors::Error, messaging::types::IncomingEvent, Result};

use crate::{
    check_ok,
    events::{ack, parse_envelope, Envelope, Frame},
    SLACK_API_BASE,
};

const INITIAL_RECONNECT_DELAY_MS: u64 = 1_000;
const MAX_RECONNECT_DELAY_MS: u64 = 300_000;

/// `apps.connections.open` errors that no amount of reconnecting fixes.
const FATAL_OPEN_ERRORS: [&str; 4] = [
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
];

/// How a single connection ended.
#[derive(Debug, PartialEq, Eq)]
enum ConnectionEnd {
    Cancelled,
    /// Slack asked us to reconnect (`disconnect` envelope).
    Refresh,
    Closed,
}

pub struct SocketModeClient {
    http: reqwest::Client,
    app_token: String,
    api_base: String,
}

impl SocketModeClient {
    pub fn new(app_token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("slack http client: {e}")))?;
        Ok(Self {
            http,
            app_token: app_token.into(),
            api_base: SLACK_API_BASE.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Keep a connection open until `cancel` fires, forwarding events to `tx`.
    ///
    /// Returns an error only for failures reconnecting cannot fix.
    pub async fn run(
        &self,
        tx: mpsc::UnboundedSender<IncomingEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut backoff = Backoff::default();
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let mut connected = false;
            let end = self.run_connection(&tx, &cancel, &mut connected).await;
            // Only consecutive failures to reach `hello` grow the delay.
            if connected {
                backoff.reset();
            }
            match end {
                Ok(ConnectionEnd::Cancelled) => return Ok(()),
                Ok(ConnectionEnd::Refresh) => continue,
                Ok(ConnectionEnd::Closed) => warn!("socket mode connection closed"),
                Err(Error::Config(msg)) => return Err(Error::Config(msg)),
                Err(e) => warn!(
                    error = %e,
                    attempt = backoff.attempt.saturating_add(1),
                    "socket mode connection failed"
                ),
            }

            let delay = backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "reconnecting to socket mode");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn open_url(&self) -> Result<String> {
        let method = "apps.connections.open";
        let resp = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.app_token)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await
            .map_err(|e| Error::External(format!("{method}: {e}")))?;
        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("{method}: invalid response: {e}")))?;

        if let Some(code) = v["error"].as_str() {
            if FATAL_OPEN_ERRORS.contains(&code) {
                return Err(Error::Config(format!("{method}: {code}")));
            }
        }
        let v = check_ok(method, v)?;
        v["url"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::External(format!("{method}: no url returned")))
    }

    /// Sets `connected` once Slack sends `hello`, even if the connection
    /// later ends in an error.
    async fn run_connection(
        &self,
        tx: &mpsc::UnboundedSender<IncomingEvent>,
        cancel: &CancellationToken,
        connected: &mut bool,
    ) -> Result<ConnectionEnd> {
        let url = self.open_url().await?;
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::External(format!("socket connect: {e}")))?;
        let (mut write, mut read) = ws.split();
        debug!("socket mode websocket open");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(ConnectionEnd::Cancelled);
                }
                next = read.next() => next,
            };

            let Some(msg) = next else {
                return Ok(ConnectionEnd::Closed);
            };
            let msg = msg.map_err(|e| Error::External(format!("socket read: {e}")))?;

            let text = match msg {
                WsMessage::Text(t) => t,
                WsMessage::Ping(data) => {
                    write
                        .send(WsMessage::Pong(data))
                        .await
                        .map_err(|e| Error::External(format!("socket write: {e}")))?;
                    continue;
                }
                WsMessage::Close(frame) => {
                    debug!(frame = ?frame, "socket mode close frame");
                    return Ok(ConnectionEnd::Closed);
                }
                _ => continue,
            };

            let envelope: Envelope = match serde_json::from_str(&text) {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "unreadable socket mode frame");
                    continue;
                }
            };

            let frame = parse_envelope(&envelope).unwrap_or_else(|e| {
                warn!(kind = %envelope.kind, error = %e, "malformed socket mode envelope");
                Frame::Ignored(envelope.kind.clone())
            });

            // Ack before any processing; Slack redelivers after 3 seconds.
            if let Some(id) = envelope.envelope_id.as_deref() {
                write
                    .send(WsMessage::Text(ack(id, &frame).to_string()))
                    .await
                    .map_err(|e| Error::External(format!("socket write: {e}")))?;
            }

            match frame {
                Frame::Hello => {
                    *connected = true;
                    info!("socket mode connected");
                }
                Frame::Disconnect { reason } => {
                    info!(reason = %reason, "socket mode disconnect requested");
                    return Ok(ConnectionEnd::Refresh);
                }
                Frame::Event(ev) => {
                    debug!(kind = ev.kind(), "event received");
                    if tx.send(ev).is_err() {
                        return Ok(ConnectionEnd::Cancelled);
                    }
                }
                Frame::Ignored(kind) => debug!(kind = %kind, "ignoring envelope"),
            }
        }
    }
}

/// Reconnect attempt counter.
#[derive(Debug, Default)]
struct Backoff {
    attempt: u32,
}

impl Backoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_delay(&mut self) -> Duration {
        let delay = reconnect_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

/// Capped exponential backoff with ±25% jitter, never below 100 ms.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let base_ms = INITIAL_RECONNECT_DELAY_MS * 2u64.pow(attempt.min(12));
    let capped_ms = base_ms.min(MAX_RECONNECT_DELAY_MS);
    Duration::from_millis(apply_jitter(capped_ms, clock_jitter()))
}

fn apply_jitter(base_ms: u64, seed: i64) -> u64 {
    let range = (base_ms / 4) as i64;
    if range == 0 {
        return base_ms.max(100);
    }
    let offset = seed.rem_euclid(2 * range + 1) - range;
    (base_ms as i64 + offset).max(100) as u64
}

fn clock_jitter() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as i64
}
