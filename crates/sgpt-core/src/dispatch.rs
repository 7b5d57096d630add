//! Event routing and the per-message relay flow.
//!
//! For every message-bearing event:
//! 1. classify the text against the current blocklist
//! 2. blocked → in-thread notice, stop
//! 3. post a placeholder, gather thread context, call the completion boundary once
//! 4. replace the placeholder with the answer (or an error notice)

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    audit::{AuditEvent, AuditLogger},
    completion::{build_turns, CompletionClient, Turn},
    errors::Error,
    filter::{first_match, RuleStore},
    formatting::{mentions_user, strip_mention_prefix, truncate},
    messaging::{
        port::MessagingPort,
        types::{
            HistoryMessage, HomeOpened, InboundMessage, IncomingEvent, Interaction,
            InteractionKind, MemberJoined, MessageBody, SlashCommand,
        },
    },
    Result,
};

pub const PLACEHOLDER_TEXT: &str = "Your request is being processed...";
pub const BLOCK_NOTICE: &str =
    "Your request was blocked because it contained a blocked keyword or sensitive data.";
pub const HOME_GREETING: &str = "Hello, welcome to the Slack GPT! Avoid sending any company proprietary into prompts. Please note that this is a work in progress and may not always work as expected.";

const MAX_ERROR_DETAIL: usize = 300;

/// Message subtypes that still carry a user's own text.
const USER_SUBTYPES: [&str; 2] = ["file_share", "thread_broadcast"];

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    /// The bot's user id (`U…`): mentions and self-authored events.
    pub bot_user_id: String,
    /// The bot's bot id (`B…`): marks its own messages in thread history.
    pub bot_id: String,
    /// Upper bound for a single completion call.
    pub completion_timeout: Duration,
}

/// Everything the dispatcher needs, passed in explicitly.
pub struct AppContext {
    pub rules: Arc<RuleStore>,
    pub messenger: Arc<dyn MessagingPort>,
    pub completion: Arc<dyn CompletionClient>,
    pub audit: Option<AuditLogger>,
    pub settings: DispatchSettings,
}

pub struct Dispatcher {
    ctx: AppContext,
}

impl Dispatcher {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, event: IncomingEvent) -> Result<()> {
        match event {
            IncomingEvent::HomeOpened(ev) => self.handle_home_opened(ev).await,
            IncomingEvent::Mention(msg) => self.handle_mention(msg).await,
            IncomingEvent::Message(msg) => self.handle_message(msg).await,
            IncomingEvent::MemberJoined(ev) => {
                self.handle_member_joined(ev);
                Ok(())
            }
            IncomingEvent::Interactive(ev) => {
                self.handle_interactive(ev);
                Ok(())
            }
            IncomingEvent::SlashCommand(cmd) => {
                self.handle_slash_command(cmd);
                Ok(())
            }
        }
    }

    async fn handle_home_opened(&self, ev: HomeOpened) -> Result<()> {
        debug!(user = %ev.user, channel = %ev.channel, "app home opened");
        self.ctx
            .messenger
            .post_message(&ev.channel, None, &MessageBody::text(HOME_GREETING))
            .await?;
        Ok(())
    }

    async fn handle_mention(&self, msg: InboundMessage) -> Result<()> {
        let text = strip_mention_prefix(&msg.text).trim().to_string();
        self.process_message(&msg, &text).await
    }

    async fn handle_message(&self, msg: InboundMessage) -> Result<()> {
        if !self.should_answer_message(&msg) {
            debug!(channel = %msg.channel, ts = %msg.ts, "ignoring message event");
            return Ok(());
        }
        let text = msg.text.trim().to_string();
        self.process_message(&msg, &text).await
    }

    fn should_answer_message(&self, msg: &InboundMessage) -> bool {
        let bot_user_id = self.ctx.settings.bot_user_id.as_str();

        let Some(user) = &msg.user else {
            return false;
        };
        if user.0 == bot_user_id || msg.bot_id.is_some() {
            return false;
        }
        if let Some(subtype) = msg.subtype.as_deref() {
            if !USER_SUBTYPES.contains(&subtype) {
                return false;
            }
        }
        // Channel mentions also arrive as `app_mention`; answer those once.
        if !msg.is_direct_message() && mentions_user(&msg.text, bot_user_id) {
            return false;
        }
        true
    }

    fn handle_member_joined(&self, ev: MemberJoined) {
        info!(user = %ev.user, channel = %ev.channel, "user joined channel");
    }

    fn handle_interactive(&self, ev: Interaction) {
        let user = ev.user.as_ref().map(|u| u.0.as_str()).unwrap_or("unknown");
        match &ev.kind {
            InteractionKind::BlockActions => {
                info!(user, actions = ?ev.action_ids, "block action received")
            }
            InteractionKind::Shortcut => info!(user, "shortcut received"),
            InteractionKind::ViewSubmission => info!(user, "view submission received"),
            InteractionKind::DialogSubmission => info!(user, "dialog submission received"),
            InteractionKind::Other(kind) => debug!(user, kind = %kind, "unhandled interaction"),
        }
    }

    fn handle_slash_command(&self, cmd: SlashCommand) {
        info!(
            command = %cmd.command,
            user = %cmd.user,
            channel = %cmd.channel,
            "slash command received"
        );
    }

    async fn process_message(&self, msg: &InboundMessage, text: &str) -> Result<()> {
        if text.is_empty() {
            debug!(channel = %msg.channel, ts = %msg.ts, "ignoring empty message");
            return Ok(());
        }

        let started = Instant::now();
        let user = msg.user.as_ref().map(|u| u.0.as_str());
        let messenger = &self.ctx.messenger;
        let thread = msg.reply_thread();

        let rules = self.ctx.rules.current();
        let verdict = first_match(text, &rules);
        debug!(
            user = user.unwrap_or("unknown"),
            ts = %msg.ts,
            blocked = verdict.is_some(),
            input = text,
            "request"
        );

        if let Some(reason) = verdict {
            info!(
                user = user.unwrap_or("unknown"),
                channel = %msg.channel,
                reason = %reason,
                "request blocked"
            );
            self.audit(AuditEvent::blocked(
                user,
                &msg.channel.0,
                &msg.ts.0,
                text,
                &reason.to_string(),
            ));
            messenger
                .post_message(&msg.channel, Some(thread), &MessageBody::text(BLOCK_NOTICE))
                .await?;
            return Ok(());
        }

        let placeholder = messenger
            .post_message(
                &msg.channel,
                Some(thread),
                &MessageBody::text(PLACEHOLDER_TEXT),
            )
            .await?;

        let mut conversation = if msg.is_threaded() {
            self.thread_context(msg).await
        } else {
            Vec::new()
        };
        conversation.push(text.to_string());
        let turns = build_turns(conversation);

        let result = self.complete(&turns).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let answer = match result {
            Ok(answer) => answer,
            Err(err) => {
                warn!(
                    user = user.unwrap_or("unknown"),
                    model = self.ctx.completion.model(),
                    error = %err,
                    duration_ms = elapsed_ms,
                    "completion failed"
                );
                let notice = format!("ChatCompletion error: {}", error_detail(&err));
                if let Err(e) = messenger
                    .update_message(&placeholder, &MessageBody::text(notice))
                    .await
                {
                    warn!(error = %e, "failed to replace placeholder with error notice");
                }
                self.audit(AuditEvent::error(
                    user,
                    &msg.channel.0,
                    &msg.ts.0,
                    text,
                    &err.to_string(),
                    elapsed_ms,
                ));
                return Err(err);
            }
        };

        if let Err(err) = messenger
            .update_message(&placeholder, &MessageBody::markdown(answer.clone()))
            .await
        {
            let notice = format!("Error updating message: {}", error_detail(&err));
            if let Err(e) = messenger
                .update_message(&placeholder, &MessageBody::text(notice))
                .await
            {
                warn!(error = %e, "failed to replace placeholder with error notice");
            }
            self.audit(AuditEvent::error(
                user,
                &msg.channel.0,
                &msg.ts.0,
                text,
                &err.to_string(),
                elapsed_ms,
            ));
            return Err(err);
        }

        debug!(
            user = user.unwrap_or("unknown"),
            ts = %msg.ts,
            turns = turns.len(),
            duration_ms = elapsed_ms,
            "request answered"
        );
        self.audit(AuditEvent::request(
            user,
            &msg.channel.0,
            &msg.ts.0,
            text,
            &answer,
            elapsed_ms,
        ));
        Ok(())
    }

    /// Prior bot answers in the thread, oldest first. Failures degrade to no context.
    async fn thread_context(&self, msg: &InboundMessage) -> Vec<String> {
        let thread = msg.reply_thread();
        match self
            .ctx
            .messenger
            .thread_replies(&msg.channel, thread)
            .await
        {
            Ok(history) => history
                .into_iter()
                .filter(|m| is_context_message(m, &self.ctx.settings.bot_id))
                .map(|m| m.text)
                .collect(),
            Err(err) => {
                warn!(channel = %msg.channel, thread = %thread, error = %err, "error getting conversation history");
                let can_whisper = self.ctx.messenger.capabilities().supports_ephemeral;
                if let Some(user) = msg.user.as_ref().filter(|_| can_whisper) {
                    let notice = format!("Error getting conversation history: {}", error_detail(&err));
                    if let Err(e) = self
                        .ctx
                        .messenger
                        .post_ephemeral(&msg.channel, user, &notice)
                        .await
                    {
                        warn!(error = %e, "failed to post ephemeral notice");
                    }
                }
                Vec::new()
            }
        }
    }

    async fn complete(&self, turns: &[Turn]) -> Result<String> {
        let limit = self.ctx.settings.completion_timeout;
        match tokio::time::timeout(limit, self.ctx.completion.invoke(turns)).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(limit)),
        }
    }

    fn audit(&self, event: AuditEvent) {
        let Some(audit) = &self.ctx.audit else {
            return;
        };
        if let Err(e) = audit.write(event) {
            warn!(path = %audit.path().display(), error = %e, "failed to write audit event");
        }
    }
}

/// A previous answer of this bot (not its placeholder) in thread history.
pub fn is_context_message(m: &HistoryMessage, bot_id: &str) -> bool {
    !bot_id.is_empty() && m.bot_id.as_deref() == Some(bot_id) && m.text != PLACEHOLDER_TEXT
}

/// Block payload returned in the slash-command acknowledgment.
pub fn slash_command_response(cmd: &SlashCommand) -> serde_json::Value {
    let text = format!(
        "*{}*: mention me in a channel or send me a direct message and I'll ask the model for you.",
        cmd.command
    );
    json!({
        "blocks": [
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": text },
                "accessory": {
                    "type": "button",
                    "action_id": "sgpt_help_ack",
                    "value": "help",
                    "text": { "type": "plain_text", "text": "Got it" }
                }
            }
        ]
    })
}

fn error_detail(err: &Error) -> String {
    let detail = match err {
        Error::Completion(s) | Error::Delivery(s) | Error::External(s) => s.clone(),
        other => other.to_string(),
    };
    truncate(&detail, MAX_ERROR_DETAIL)
}
