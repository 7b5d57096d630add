//! Slack adapter (Web API + Socket Mode).
//!
//! This crate implements the `sgpt-core` MessagingPort over the Slack Web API
//! and turns Socket Mode envelopes into core events.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

pub mod events;
pub mod router;
pub mod socket;

use sgpt_core::{
    domain::{ChannelId, MessageRef, Ts, UserId},
    errors::Error,
    formatting::{split_sections, truncate},
    messaging::{
        port::MessagingPort,
        types::{HistoryMessage, MessageBody, MessagingCapabilities},
    },
    Result,
};

pub const SLACK_API_BASE: &str = "https://slack.com/api";

/// Slack caps a section block's text at 3000 characters and a message at 50 blocks.
const MAX_SECTION_LEN: usize = 3000;
const MAX_BLOCKS: usize = 50;
const REPLIES_PAGE_SIZE: &str = "200";

/// Who the bot token belongs to, from `auth.test`.
#[derive(Clone, Debug, Deserialize)]
pub struct BotIdentity {
    pub user_id: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

#[derive(Clone)]
pub struct SlackMessenger {
    http: reqwest::Client,
    bot_token: String,
    api_base: String,
}

impl SlackMessenger {
    pub fn new(bot_token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("slack http client: {e}")))?;
        Ok(Self {
            http,
            bot_token: bot_token.into(),
            api_base: SLACK_API_BASE.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn auth_test(&self) -> Result<BotIdentity> {
        let v = self.call("auth.test", &json!({})).await?;
        serde_json::from_value(v).map_err(|e| Error::External(format!("auth.test: {e}")))
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value> {
        debug!(method, "slack api call");
        let resp = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("{method}: {e}")))?;
        read_api_response(method, resp).await
    }

    async fn call_get(&self, method: &str, query: &[(&str, &str)]) -> Result<Value> {
        debug!(method, "slack api call");
        let resp = self
            .http
            .get(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.bot_token)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("{method}: {e}")))?;
        read_api_response(method, resp).await
    }
}

async fn read_api_response(method: &str, resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("?")
            .to_string();
        return Err(Error::Delivery(format!(
            "{method}: rate limited (retry after {retry_after}s)"
        )));
    }
    if !status.is_success() {
        return Err(Error::Delivery(format!("{method}: http {}", status.as_u16())));
    }
    let v: Value = resp
        .json()
        .await
        .map_err(|e| Error::Delivery(format!("{method}: invalid response: {e}")))?;
    check_ok(method, v)
}

/// Slack reports failures as `{"ok": false, "error": "..."}` with HTTP 200.
pub fn check_ok(method: &str, v: Value) -> Result<Value> {
    if v["ok"].as_bool().unwrap_or(false) {
        return Ok(v);
    }
    let err = v["error"].as_str().unwrap_or("unknown_error");
    Err(Error::Delivery(format!("{method}: {err}")))
}

/// Section blocks for mrkdwn text, split to fit Slack's limits.
pub fn section_blocks(text: &str, max_len: usize, max_blocks: usize) -> Vec<Value> {
    let mut sections = split_sections(text, max_len);
    if sections.len() > max_blocks {
        sections.truncate(max_blocks);
        if let Some(last) = sections.last_mut() {
            let keep = max_len.saturating_sub(3);
            *last = truncate(last, keep);
        }
    }
    sections
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| json!({ "type": "section", "text": { "type": "mrkdwn", "text": s } }))
        .collect()
}

/// `text` (+ `blocks` for mrkdwn) fields of a chat.postMessage/chat.update body.
pub fn message_fields(
    body: &MessageBody,
    caps: &MessagingCapabilities,
) -> serde_json::Map<String, Value> {
    let mut fields = serde_json::Map::new();
    match body {
        MessageBody::Text(s) => {
            fields.insert("text".to_string(), json!(s));
        }
        MessageBody::Markdown(s) => {
            // Plain fallback keeps thread history readable as context.
            fields.insert("text".to_string(), json!(s));
            let blocks = section_blocks(s, caps.max_section_len, caps.max_blocks);
            if !blocks.is_empty() {
                fields.insert("blocks".to_string(), Value::Array(blocks));
            }
        }
    }
    fields
}

#[derive(Debug, Deserialize)]
struct RawHistoryMessage {
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: String,
}

impl From<RawHistoryMessage> for HistoryMessage {
    fn from(m: RawHistoryMessage) -> Self {
        HistoryMessage {
            bot_id: m.bot_id,
            text: m.text,
        }
    }
}

/// Messages of one conversations.replies page, plus the next cursor if any.
pub fn parse_replies_page(v: &Value) -> Result<(Vec<HistoryMessage>, Option<String>)> {
    let raw: Vec<RawHistoryMessage> = match v.get("messages") {
        Some(m) => serde_json::from_value(m.clone())?,
        None => Vec::new(),
    };
    let cursor = v["response_metadata"]["next_cursor"]
        .as_str()
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string());
    Ok((raw.into_iter().map(HistoryMessage::from).collect(), cursor))
}

#[async_trait]
impl MessagingPort for SlackMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_ephemeral: true,
            max_section_len: MAX_SECTION_LEN,
            max_blocks: MAX_BLOCKS,
        }
    }

    async fn post_message(
        &self,
        channel: &ChannelId,
        thread: Option<&Ts>,
        body: &MessageBody,
    ) -> Result<MessageRef> {
        let mut req = message_fields(body, &self.capabilities());
        req.insert("channel".to_string(), json!(channel.0));
        if let Some(t) = thread {
            req.insert("thread_ts".to_string(), json!(t.0));
        }

        let v = self.call("chat.postMessage", &Value::Object(req)).await?;
        let ts = v["ts"]
            .as_str()
            .ok_or_else(|| Error::Delivery("chat.postMessage: missing ts".to_string()))?;
        let channel = v["channel"].as_str().unwrap_or(&channel.0);
        Ok(MessageRef {
            channel: ChannelId(channel.to_string()),
            ts: Ts(ts.to_string()),
        })
    }

    async fn update_message(&self, msg: &MessageRef, body: &MessageBody) -> Result<()> {
        let mut req = message_fields(body, &self.capabilities());
        req.insert("channel".to_string(), json!(msg.channel.0));
        req.insert("ts".to_string(), json!(msg.ts.0));
        self.call("chat.update", &Value::Object(req)).await?;
        Ok(())
    }

    async fn post_ephemeral(&self, channel: &ChannelId, user: &UserId, text: &str) -> Result<()> {
        self.call(
            "chat.postEphemeral",
            &json!({ "channel": channel.0, "user": user.0, "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn thread_replies(
        &self,
        channel: &ChannelId,
        thread: &Ts,
    ) -> Result<Vec<HistoryMessage>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![
                ("channel", channel.0.as_str()),
                ("ts", thread.0.as_str()),
                ("limit", REPLIES_PAGE_SIZE),
            ];
            if let Some(c) = cursor.as_deref() {
                query.push(("cursor", c));
            }
            let v = self.call_get("conversations.replies", &query).await?;
            let (page, next) = parse_replies_page(&v)?;
            out.extend(page);
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    #[test]
    fn ok_false_becomes_delivery_error() {
        let err = check_ok("chat.postMessage", json!({"ok": false, "error": "channel_not_found"}))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "delivery error: chat.postMessage: channel_not_found"
        );
        assert!(check_ok("auth.test", json!({"ok": true, "user_id": "U1"})).is_ok());
    }

    fn slack_caps() -> MessagingCapabilities {
        SlackMessenger::new("xoxb-test").unwrap().capabilities()
    }

    #[test]
    fn markdown_body_renders_section_blocks_with_fallback() {
        let fields = message_fields(&MessageBody::markdown("*bold* answer"), &slack_caps());
        assert_eq!(fields["text"], "*bold* answer");
        let blocks = fields["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["type"], "section");
        assert_eq!(blocks[0]["text"]["type"], "mrkdwn");
        assert_eq!(blocks[0]["text"]["text"], "*bold* answer");
    }

    #[test]
    fn markdown_sections_follow_messenger_limits() {
        let caps = MessagingCapabilities {
            max_section_len: 5,
            max_blocks: 2,
            ..slack_caps()
        };
        let fields = message_fields(&MessageBody::markdown("aaaa bbbb cccc"), &caps);
        let blocks = fields["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(fields["text"], "aaaa bbbb cccc");
    }

    #[test]
    fn text_body_has_no_blocks() {
        let fields = message_fields(
            &MessageBody::text("Your request is being processed..."),
            &slack_caps(),
        );
        assert_eq!(fields["text"], "Your request is being processed...");
        assert!(!fields.contains_key("blocks"));
    }

    #[test]
    fn long_markdown_splits_into_several_sections() {
        let text = format!("{}\n{}", "a".repeat(2500), "b".repeat(2500));
        let blocks = section_blocks(&text, MAX_SECTION_LEN, MAX_BLOCKS);
        assert_eq!(blocks.len(), 2);
        assert!(blocks
            .iter()
            .all(|b| b["text"]["text"].as_str().unwrap().chars().count() <= MAX_SECTION_LEN));
    }

    #[test]
    fn block_count_is_capped() {
        let text = "word ".repeat(100);
        let blocks = section_blocks(&text, 10, 3);
        assert_eq!(blocks.len(), 3);
        assert!(blocks[2]["text"]["text"].as_str().unwrap().ends_with("..."));
    }

    #[test]
    fn replies_page_parses_messages_and_cursor() {
        let v = json!({
            "ok": true,
            "messages": [
                { "type": "message", "user": "U1", "text": "question", "ts": "1.0", "thread_ts": "1.0" },
                { "type": "message", "user": "UBOT", "bot_id": "BBOT", "text": "answer", "ts": "1.1" }
            ],
            "has_more": true,
            "response_metadata": { "next_cursor": "bmV4dA==" }
        });
        let (msgs, cursor) = parse_replies_page(&v).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].bot_id, None);
        assert_eq!(msgs[0].text, "question");
        assert_eq!(msgs[1].bot_id.as_deref(), Some("BBOT"));
        assert_eq!(msgs[1].text, "answer");
        assert_eq!(cursor.as_deref(), Some("bmV4dA=="));

        let last = json!({ "ok": true, "messages": [], "response_metadata": { "next_cursor": "" } });
        let (msgs, cursor) = parse_replies_page(&last).unwrap();
        assert!(msgs.is_empty());
        assert!(cursor.is_none());
    }

    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let len = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= head_end + 4 + len {
                        break;
                    }
                }
            }
            let resp = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{addr}"), task)
    }

    #[tokio::test]
    async fn post_message_threads_reply_and_returns_ref() {
        let (base, server) = serve_once(r#"{"ok":true,"channel":"C1","ts":"1700000000.000200"}"#).await;
        let slack = SlackMessenger::new("xoxb-test").unwrap().with_api_base(base);

        let msg = slack
            .post_message(
                &ChannelId("C1".to_string()),
                Some(&Ts("1700000000.000100".to_string())),
                &MessageBody::text("Your request is being processed..."),
            )
            .await
            .unwrap();
        assert_eq!(msg.ts, Ts("1700000000.000200".to_string()));
        assert_eq!(msg.channel, ChannelId("C1".to_string()));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /chat.postMessage"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer xoxb-test"));
        assert!(request.contains(r#""thread_ts":"1700000000.000100""#));
    }

    #[tokio::test]
    async fn update_failure_surfaces_slack_error() {
        let (base, server) = serve_once(r#"{"ok":false,"error":"msg_too_long"}"#).await;
        let slack = SlackMessenger::new("xoxb-test").unwrap().with_api_base(base);

        let err = slack
            .update_message(
                &MessageRef {
                    channel: ChannelId("C1".to_string()),
                    ts: Ts("1.0".to_string()),
                },
                &MessageBody::markdown("answer"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "delivery error: chat.update: msg_too_long");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn auth_test_reads_identity() {
        let (base, server) = serve_once(
            r#"{"ok":true,"url":"https://acme.slack.com/","team":"Acme","user":"gpt","team_id":"T1","user_id":"UBOT","bot_id":"BBOT"}"#,
        )
        .await;
        let slack = SlackMessenger::new("xoxb-test").unwrap().with_api_base(base);

        let me = slack.auth_test().await.unwrap();
        assert_eq!(me.user_id, "UBOT");
        assert_eq!(me.bot_id.as_deref(), Some("BBOT"));
        assert_eq!(me.team.as_deref(), Some("Acme"));
        server.await.unwrap();
    }
}
