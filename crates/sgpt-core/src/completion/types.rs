use serde::{Deserialize, Serialize};

/// Author of a chat turn, as the completion API sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Assistant => "assistant",
            Role::User => "user",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Tag an ordered conversation: every message but the last is a prior
/// assistant turn, the last is the new user turn.
pub fn build_turns<I, S>(messages: I) -> Vec<Turn>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut turns: Vec<Turn> = messages
        .into_iter()
        .map(|m| Turn::assistant(m))
        .collect();
    if let Some(last) = turns.last_mut() {
        last.role = Role::User;
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_message_is_a_user_turn() {
        assert_eq!(build_turns(["hi"]), vec![Turn::user("hi")]);
    }

    #[test]
    fn prior_messages_are_assistant_turns() {
        let turns = build_turns(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(
            turns,
            vec![Turn::assistant("a"), Turn::assistant("b"), Turn::user("c")]
        );
    }

    #[test]
    fn empty_conversation_has_no_turns() {
        assert!(build_turns(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn roles_serialize_lowercase() {
        let v = serde_json::to_value(Turn::assistant("x")).unwrap();
        assert_eq!(v["role"], "assistant");
        assert_eq!(Role::User.as_str(), "user");
    }
}
