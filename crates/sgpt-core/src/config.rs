use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const APP_TOKEN_PREFIX: &str = "xapp-";
pub const BOT_TOKEN_PREFIX: &str = "xoxb-";

const DEFAULT_FILTER_CONFIG: &str = "config.yaml";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_COMPLETION_TIMEOUT_MS: u64 = 60_000;

/// Typed process configuration, sourced from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Secrets
    pub gpt_api_key: String,
    pub slack_app_token: String,
    pub slack_bot_token: String,

    // Slack identity. `None` means "ask auth.test at startup".
    pub slack_bot_id: Option<String>,

    // Blocklist document watched for live reloads.
    pub filter_config_path: PathBuf,

    // Completion boundary
    pub openai_model: String,
    pub openai_base_url: String,
    pub completion_timeout: Duration,

    // Audit
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let gpt_api_key = get("GPT_API_KEY")
            .ok_or_else(|| Error::Config("GPT_API_KEY must be set".to_string()))?;
        let slack_app_token = require_token(&get, "SLACK_APP_TOKEN", APP_TOKEN_PREFIX)?;
        let slack_bot_token = require_token(&get, "SLACK_BOT_TOKEN", BOT_TOKEN_PREFIX)?;

        let slack_bot_id = get("SLACK_BOT_ID");

        let filter_config_path = PathBuf::from(
            get("FILTER_CONFIG_PATH").unwrap_or_else(|| DEFAULT_FILTER_CONFIG.to_string()),
        );

        let openai_model = get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let openai_base_url = get("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let completion_timeout_ms = match get("COMPLETION_TIMEOUT_MS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("COMPLETION_TIMEOUT_MS is not a number: {raw}"))
            })?,
            None => DEFAULT_COMPLETION_TIMEOUT_MS,
        };
        if completion_timeout_ms == 0 {
            return Err(Error::Config(
                "COMPLETION_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let audit_log_path = get("AUDIT_LOG_PATH").map(PathBuf::from);
        let audit_log_json = get("AUDIT_LOG_JSON").map(|s| parse_bool(&s)).unwrap_or(false);

        Ok(Self {
            gpt_api_key,
            slack_app_token,
            slack_bot_token,
            slack_bot_id,
            filter_config_path,
            openai_model,
            openai_base_url,
            completion_timeout: Duration::from_millis(completion_timeout_ms),
            audit_log_path,
            audit_log_json,
        })
    }
}

fn require_token(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    prefix: &str,
) -> Result<String> {
    let token = get(key).ok_or_else(|| Error::Config(format!("{key} must be set")))?;
    if !token.starts_with(prefix) {
        return Err(Error::Config(format!(
            "{key} must have the prefix \"{prefix}\""
        )));
    }
    Ok(token)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
