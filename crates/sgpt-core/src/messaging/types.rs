use crate::domain::{ChannelId, Ts, UserId};

/// Inbound platform event, after transport-level acknowledgment.
///
/// Connection lifecycle frames stay in the transport; everything the
/// dispatcher reacts to is one of these.
#[derive(Clone, Debug)]
pub enum IncomingEvent {
    HomeOpened(HomeOpened),
    Mention(InboundMessage),
    Message(InboundMessage),
    MemberJoined(MemberJoined),
    Interactive(Interaction),
    SlashCommand(SlashCommand),
}

impl IncomingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            IncomingEvent::HomeOpened(_) => "app_home_opened",
            IncomingEvent::Mention(_) => "app_mention",
            IncomingEvent::Message(_) => "message",
            IncomingEvent::MemberJoined(_) => "member_joined_channel",
            IncomingEvent::Interactive(_) => "interactive",
            IncomingEvent::SlashCommand(_) => "slash_command",
        }
    }
}

#[derive(Clone, Debug)]
pub struct HomeOpened {
    pub user: UserId,
    pub channel: ChannelId,
}

/// A message-bearing event (`app_mention` or `message`).
#[derive(Clone, Debug, Default)]
pub struct InboundMessage {
    pub channel: ChannelId,
    pub user: Option<UserId>,
    pub text: String,
    pub ts: Ts,
    pub thread_ts: Option<Ts>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
    pub channel_type: Option<String>,
}

impl InboundMessage {
    /// A reply inside an existing thread (not the thread parent itself).
    pub fn is_threaded(&self) -> bool {
        matches!(&self.thread_ts, Some(t) if !t.0.is_empty() && *t != self.ts)
    }

    /// Thread to answer in: the existing thread, or a new one under this message.
    pub fn reply_thread(&self) -> &Ts {
        match &self.thread_ts {
            Some(t) if !t.0.is_empty() => t,
            _ => &self.ts,
        }
    }

    pub fn is_direct_message(&self) -> bool {
        self.channel_type.as_deref() == Some("im")
    }
}

#[derive(Clone, Debug)]
pub struct MemberJoined {
    pub user: UserId,
    pub channel: ChannelId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InteractionKind {
    BlockActions,
    Shortcut,
    ViewSubmission,
    DialogSubmission,
    Other(String),
}

impl InteractionKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "block_actions" => InteractionKind::BlockActions,
            "shortcut" | "message_action" => InteractionKind::Shortcut,
            "view_submission" => InteractionKind::ViewSubmission,
            "dialog_submission" => InteractionKind::DialogSubmission,
            other => InteractionKind::Other(other.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Interaction {
    pub kind: InteractionKind,
    pub user: Option<UserId>,
    pub channel: Option<ChannelId>,
    pub action_ids: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct SlashCommand {
    pub command: String,
    pub text: String,
    pub user: UserId,
    pub channel: ChannelId,
}

/// A message as returned by thread history.
#[derive(Clone, Debug, Default)]
pub struct HistoryMessage {
    pub bot_id: Option<String>,
    pub text: String,
}

/// Outgoing message content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    /// Plain text, no markup parsing.
    Text(String),
    /// Slack mrkdwn, rendered as section blocks with a plain-text fallback.
    Markdown(String),
}

impl MessageBody {
    pub fn text(s: impl Into<String>) -> Self {
        MessageBody::Text(s.into())
    }

    pub fn markdown(s: impl Into<String>) -> Self {
        MessageBody::Markdown(s.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageBody::Text(s) | MessageBody::Markdown(s) => s,
        }
    }
}

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_ephemeral: bool,
    pub max_section_len: usize,
    pub max_blocks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(ts: &str, thread_ts: Option<&str>) -> InboundMessage {
        InboundMessage {
            channel: ChannelId("C1".to_string()),
            ts: Ts(ts.to_string()),
            thread_ts: thread_ts.map(|t| Ts(t.to_string())),
            ..Default::default()
        }
    }

    #[test]
    fn thread_detection() {
        assert!(!msg("1.0", None).is_threaded());
        assert!(!msg("1.0", Some("1.0")).is_threaded());
        assert!(!msg("1.0", Some("")).is_threaded());
        assert!(msg("2.0", Some("1.0")).is_threaded());
    }

    #[test]
    fn replies_go_to_parent_thread() {
        assert_eq!(msg("2.0", Some("1.0")).reply_thread().0, "1.0");
        assert_eq!(msg("2.0", None).reply_thread().0, "2.0");
        assert_eq!(msg("2.0", Some("")).reply_thread().0, "2.0");
    }

    #[test]
    fn interaction_kinds() {
        assert_eq!(
            InteractionKind::parse("block_actions"),
            InteractionKind::BlockActions
        );
        assert_eq!(
            InteractionKind::parse("view_submission"),
            InteractionKind::ViewSubmission
        );
        assert_eq!(
            InteractionKind::parse("workflow_step_edit"),
            InteractionKind::Other("workflow_step_edit".to_string())
        );
    }
}
