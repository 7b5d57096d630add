use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sgpt_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use sgpt_core::{
    audit::AuditLogger,
    config::Config,
    dispatch::{AppContext, DispatchSettings, Dispatcher},
    filter::{RuleStore, RuleWatcher},
    messaging::{port::MessagingPort, types::IncomingEvent},
};
use sgpt_openai::OpenAiClient;

use crate::{socket::SocketModeClient, BotIdentity, SlackMessenger};

pub async fn run(cfg: Arc<Config>) -> anyhow::Result<()> {
    let slack = SlackMessenger::new(cfg.slack_bot_token.clone())?;
    let identity = slack.auth_test().await.context("slack auth.test failed")?;
    let bot_id = resolve_bot_id(cfg.slack_bot_id.as_deref(), &identity);
    if bot_id.is_empty() {
        warn!("no bot id known; thread history will not be used as context");
    }
    info!(
        user_id = %identity.user_id,
        bot_id = %bot_id,
        team = identity.team.as_deref().unwrap_or("?"),
        "authenticated with slack"
    );

    let rules = Arc::new(RuleStore::open(&cfg.filter_config_path)?);
    let cancel = CancellationToken::new();
    let watcher = RuleWatcher::spawn(rules.clone(), cancel.child_token())?;

    // Pace Web API calls to stay under Slack's per-channel posting tier.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(slack);
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));
    let completion = Arc::new(OpenAiClient::from_config(&cfg)?);
    info!(model = %cfg.openai_model, "completion backend ready");

    let audit = cfg
        .audit_log_path
        .as_ref()
        .map(|p| AuditLogger::new(p.clone(), cfg.audit_log_json));

    let dispatcher = Dispatcher::new(AppContext {
        rules,
        messenger,
        completion,
        audit,
        settings: DispatchSettings {
            bot_user_id: identity.user_id.clone(),
            bot_id,
            completion_timeout: cfg.completion_timeout,
        },
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let socket = SocketModeClient::new(cfg.slack_app_token.clone())?;
    let socket_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { socket.run(tx, cancel).await }
    });

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        }
    });

    // Ends once the socket task drops its sender (shutdown or fatal error).
    consume_events(&dispatcher, rx).await;
    cancel.cancel();
    watcher.join().await;

    socket_task
        .await
        .context("socket mode task panicked")?
        .context("socket mode connection failed")?;
    info!("stopped");
    Ok(())
}

/// Handle events one at a time, in arrival order.
async fn consume_events(dispatcher: &Dispatcher, mut rx: mpsc::UnboundedReceiver<IncomingEvent>) {
    while let Some(event) = rx.recv().await {
        let kind = event.kind();
        if let Err(e) = dispatcher.dispatch(event).await {
            warn!(kind, error = %e, "event handling failed");
        }
    }
}

/// Explicit `SLACK_BOT_ID` wins over the id reported by `auth.test`.
fn resolve_bot_id(configured: Option<&str>, identity: &BotIdentity) -> String {
    configured
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| identity.bot_id.clone())
        .unwrap_or_default()
}
