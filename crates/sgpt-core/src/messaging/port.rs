use async_trait::async_trait;

use crate::{
    domain::{ChannelId, MessageRef, Ts, UserId},
    messaging::types::{HistoryMessage, MessageBody, MessagingCapabilities},
    Result,
};

/// Outbound messaging port.
///
/// Slack is the implementation today; the dispatcher only talks to this trait
/// so tests can substitute a recording fake.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    /// Post a message, optionally as a reply in `thread`.
    async fn post_message(
        &self,
        channel: &ChannelId,
        thread: Option<&Ts>,
        body: &MessageBody,
    ) -> Result<MessageRef>;

    /// Replace the content of a previously posted message.
    async fn update_message(&self, msg: &MessageRef, body: &MessageBody) -> Result<()>;

    /// Post a message only `user` can see.
    async fn post_ephemeral(&self, channel: &ChannelId, user: &UserId, text: &str) -> Result<()>;

    /// Parent message plus replies of a thread, oldest first.
    async fn thread_replies(&self, channel: &ChannelId, thread: &Ts)
        -> Result<Vec<HistoryMessage>>;
}
