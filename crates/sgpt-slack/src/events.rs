//! Socket Mode envelope parsing.
//!
//! Every envelope carrying an `envelope_id` is acknowledged by the socket
//! loop; this module only decides what the envelope means.

use serde::Deserialize;
use serde_json::{json, Value};

use sgpt_core::{
    dispatch::slash_command_response,
    domain::{ChannelId, Ts, UserId},
    messaging::types::{
        HomeOpened, InboundMessage, IncomingEvent, Interaction, InteractionKind, MemberJoined,
        SlashCommand,
    },
    Result,
};

#[derive(Clone, Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What an envelope means to the connection loop.
#[derive(Clone, Debug)]
pub enum Frame {
    Hello,
    Disconnect { reason: String },
    Event(IncomingEvent),
    Ignored(String),
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    event: Option<RawEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawEvent {
    #[serde(rename = "app_home_opened")]
    AppHomeOpened { user: String, channel: String },
    #[serde(rename = "app_mention")]
    AppMention(RawMessage),
    #[serde(rename = "message")]
    Message(RawMessage),
    #[serde(rename = "member_joined_channel")]
    MemberJoinedChannel { user: String, channel: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    channel_type: Option<String>,
}

impl From<RawMessage> for InboundMessage {
    fn from(m: RawMessage) -> Self {
        InboundMessage {
            channel: ChannelId(m.channel),
            user: m.user.filter(|u| !u.is_empty()).map(UserId),
            text: m.text,
            ts: Ts(m.ts),
            thread_ts: m.thread_ts.map(Ts),
            bot_id: m.bot_id.filter(|b| !b.is_empty()),
            subtype: m.subtype,
            channel_type: m.channel_type,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(default)]
    action_id: String,
}

#[derive(Debug, Deserialize)]
struct RawInteraction {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    user: Option<IdRef>,
    #[serde(default)]
    channel: Option<IdRef>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawSlashCommand {
    command: String,
    #[serde(default)]
    text: String,
    user_id: String,
    channel_id: String,
}

pub fn parse_envelope(env: &Envelope) -> Result<Frame> {
    match env.kind.as_str() {
        "hello" => Ok(Frame::Hello),
        "disconnect" => Ok(Frame::Disconnect {
            reason: env.reason.clone().unwrap_or_else(|| "unknown".to_string()),
        }),
        "events_api" => parse_events_api(&env.payload),
        "interactive" => {
            let raw: RawInteraction = serde_json::from_value(env.payload.clone())?;
            Ok(Frame::Event(IncomingEvent::Interactive(Interaction {
                kind: InteractionKind::parse(&raw.kind),
                user: raw.user.map(|u| UserId(u.id)),
                channel: raw.channel.map(|c| ChannelId(c.id)),
                action_ids: raw.actions.into_iter().map(|a| a.action_id).collect(),
            })))
        }
        "slash_commands" => {
            let raw: RawSlashCommand = serde_json::from_value(env.payload.clone())?;
            Ok(Frame::Event(IncomingEvent::SlashCommand(SlashCommand {
                command: raw.command,
                text: raw.text,
                user: UserId(raw.user_id),
                channel: ChannelId(raw.channel_id),
            })))
        }
        other => Ok(Frame::Ignored(other.to_string())),
    }
}

fn parse_events_api(payload: &Value) -> Result<Frame> {
    let cb: EventCallback = serde_json::from_value(payload.clone())?;
    if cb.kind != "event_callback" {
        return Ok(Frame::Ignored(format!("events_api/{}", cb.kind)));
    }
    let frame = match cb.event {
        Some(RawEvent::AppHomeOpened { user, channel }) => {
            Frame::Event(IncomingEvent::HomeOpened(HomeOpened {
                user: UserId(user),
                channel: ChannelId(channel),
            }))
        }
        Some(RawEvent::AppMention(m)) => Frame::Event(IncomingEvent::Mention(m.into())),
        Some(RawEvent::Message(m)) => Frame::Event(IncomingEvent::Message(m.into())),
        Some(RawEvent::MemberJoinedChannel { user, channel }) => {
            Frame::Event(IncomingEvent::MemberJoined(MemberJoined {
                user: UserId(user),
                channel: ChannelId(channel),
            }))
        }
        Some(RawEvent::Other) | None => Frame::Ignored("events_api/unsupported".to_string()),
    };
    Ok(frame)
}

/// Acknowledgment for an envelope; slash commands carry their response.
pub fn ack(envelope_id: &str, frame: &Frame) -> Value {
    match frame {
        Frame::Event(IncomingEvent::SlashCommand(cmd)) => json!({
            "envelope_id": envelope_id,
            "payload": slash_command_response(cmd),
        }),
        _ => json!({ "envelope_id": envelope_id }),
    }
}
