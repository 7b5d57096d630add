//! OpenAI adapter (chat completions).
//!
//! One `POST /v1/chat/completions` per call; no streaming, no retries.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use sgpt_core::{
    completion::{CompletionClient, Turn},
    config::Config,
    errors::Error,
    formatting::truncate,
    Result,
};

const MAX_ERROR_BODY: usize = 200;

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("openai http client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.gpt_api_key, &cfg.openai_model, &cfg.openai_base_url)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

/// Request body for a chat completion over `turns`.
pub fn request_body(model: &str, turns: &[Turn]) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = turns
        .iter()
        .map(|t| json!({ "role": t.role.as_str(), "content": t.content }))
        .collect();
    json!({
        "model": model,
        "messages": messages,
    })
}

/// First choice's message content.
pub fn parse_response(v: &serde_json::Value) -> Result<String> {
    v["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Completion("missing choices[0].message.content".to_string()))
}

/// Human-readable failure for a non-success response.
pub fn api_error(status: reqwest::StatusCode, body: &str) -> Error {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| body.to_string());
    Error::Completion(format!(
        "status {}: {}",
        status.as_u16(),
        truncate(detail.trim(), MAX_ERROR_BODY)
    ))
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, turns: &[Turn]) -> Result<String> {
        if turns.is_empty() {
            return Err(Error::Completion("no messages to send".to_string()));
        }

        let url = self.endpoint();
        let body = request_body(&self.model, turns);
        debug!(url = %url, model = %self.model, turns = turns.len(), "openai request");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Completion(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Completion(format!("invalid response body: {e}")))?;
        parse_response(&v)
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
    fn body_carries_model_and_ordered_roles() {
        let turns = vec![
            Turn::assistant("first answer"),
            Turn::assistant("second answer"),
            Turn::user("question"),
        ];
        let v = request_body("gpt-3.5-turbo", &turns);
        assert_eq!(v["model"], "gpt-3.5-turbo");
        let msgs = v["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0]["role"], "assistant");
        assert_eq!(msgs[1]["content"], "second answer");
        assert_eq!(msgs[2]["role"], "user");
        assert_eq!(msgs[2]["content"], "question");
    }

    #[test]
    fn parses_first_choice() {
        let v = json!({
            "choices": [
                { "message": { "role": "assistant", "content": "hello" } },
                { "message": { "role": "assistant", "content": "ignored" } }
            ]
        });
        assert_eq!(parse_response(&v).unwrap(), "hello");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let v = json!({ "choices": [] });
        assert!(matches!(parse_response(&v), Err(Error::Completion(_))));
    }

    #[test]
    fn api_error_prefers_error_message() {
        let err = api_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#,
        );
        assert_eq!(
            err.to_string(),
            "completion error: status 429: Rate limit reached"
        );

        let err = api_error(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.to_string(), "completion error: status 502: upstream down");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let c = OpenAiClient::new("k", "m", "http://localhost:1234/").unwrap();
        assert_eq!(c.endpoint(), "http://localhost:1234/v1/chat/completions");
        assert_eq!(c.model(), "m");
    }

    /// Serve a single canned HTTP response and hand back the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
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
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{addr}"), task)
    }

    #[tokio::test]
    async fn invoke_posts_turns_and_returns_content() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"pong"}}]}"#,
        )
        .await;
        let client = OpenAiClient::new("sk-test", "gpt-3.5-turbo", base).unwrap();

        let out = client.invoke(&[Turn::user("ping")]).await.unwrap();
        assert_eq!(out, "pong");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains(r#""content":"ping""#));
    }

    #[tokio::test]
    async fn invoke_maps_http_failure() {
        let (base, server) = serve_once(
            "401 Unauthorized",
            r#"{"error":{"message":"Incorrect API key provided"}}"#,
        )
        .await;
        let client = OpenAiClient::new("bad", "gpt-3.5-turbo", base).unwrap();

        let err = client.invoke(&[Turn::user("ping")]).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "completion error: status 401: Incorrect API key provided"
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn invoke_rejects_empty_conversation() {
        let client = OpenAiClient::new("k", "m", "http://127.0.0.1:9").unwrap();
        assert!(matches!(client.invoke(&[]).await, Err(Error::Completion(_))));
    }
}
