use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{errors::Error, formatting::truncate, Result};

const AUDIT_MAX_TEXT: usize = 500;

/// One processed message, as written to the audit log.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub channel: String,
    pub ts: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AuditEvent {
    fn base(event: &str, user: Option<&str>, channel: &str, ts: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            user: user.map(|s| s.to_string()),
            channel: channel.to_string(),
            ts: ts.to_string(),
            input: None,
            response: None,
            reason: None,
            error: None,
            duration_ms: None,
        }
    }

    pub fn request(
        user: Option<&str>,
        channel: &str,
        ts: &str,
        input: &str,
        response: &str,
        duration_ms: u64,
    ) -> Self {
        Self {
            input: Some(input.to_string()),
            response: Some(response.to_string()),
            duration_ms: Some(duration_ms),
            ..Self::base("request", user, channel, ts)
        }
    }

    pub fn blocked(user: Option<&str>, channel: &str, ts: &str, input: &str, reason: &str) -> Self {
        Self {
            input: Some(input.to_string()),
            reason: Some(reason.to_string()),
            ..Self::base("blocked", user, channel, ts)
        }
    }

    pub fn error(
        user: Option<&str>,
        channel: &str,
        ts: &str,
        input: &str,
        error: &str,
        duration_ms: u64,
    ) -> Self {
        Self {
            input: Some(input.to_string()),
            error: Some(error.to_string()),
            duration_ms: Some(duration_ms),
            ..Self::base("error", user, channel, ts)
        }
    }
}

/// Append-only audit file, one record per processed message.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        event.input = event.input.map(|s| truncate(&s, AUDIT_MAX_TEXT));
        event.response = event.response.map(|s| truncate(&s, AUDIT_MAX_TEXT));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        PathBuf::from(format!("/tmp/{prefix}-{}-{ts}.log", std::process::id()))
    }

    #[test]
    fn json_lines_are_truncated_on_write() {
        let log = AuditLogger::new(tmp_file("sgpt-audit-json"), true);
        let input = "x".repeat(AUDIT_MAX_TEXT + 1);
        let response = "y".repeat(AUDIT_MAX_TEXT + 50);
        log.write(AuditEvent::request(Some("U1"), "C1", "1.0", &input, &response, 42))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(v["event"], "request");
        assert_eq!(v["user"], "U1");
        assert_eq!(v["duration_ms"], 42);
        assert!(v["input"].as_str().unwrap().ends_with("..."));
        assert!(v["response"].as_str().unwrap().ends_with("..."));
        assert!(v.get("error").is_none());
    }

    #[test]
    fn text_format_lists_fields() {
        let log = AuditLogger::new(tmp_file("sgpt-audit-text"), false);
        log.write(AuditEvent::blocked(None, "C1", "1.0", "my secret", "keyword \"secret\""))
            .unwrap();
        log.write(AuditEvent::error(Some("U2"), "C1", "2.0", "hi", "boom", 7))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("event: blocked"));
        assert!(written.contains("reason: keyword \"secret\""));
        assert!(written.contains("event: error"));
        assert!(written.contains("duration_ms: 7"));
        assert!(!written.contains("user: null"));
    }
}
