/// Slack user id (`U…`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

/// Slack channel id (`C…`, `D…`, `G…`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChannelId(pub String);

/// Slack message timestamp. Doubles as the message id within a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ts(pub String);

/// A stable reference to a posted Slack message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub ts: Ts,
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for Ts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
