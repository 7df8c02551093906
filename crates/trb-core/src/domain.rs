/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// A community channel the requester must belong to.
///
/// Either a public `@username` or a numeric chat id (`-100...`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Username(String),
    Id(i64),
}

impl Channel {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(id) = raw.parse::<i64>() {
            return Some(Channel::Id(id));
        }
        let name = raw.trim_start_matches('@');
        if name.is_empty() {
            return None;
        }
        Some(Channel::Username(format!("@{name}")))
    }

    /// Public join link, only available for `@username` channels.
    pub fn join_url(&self) -> Option<String> {
        match self {
            Channel::Username(name) => {
                Some(format!("https://t.me/{}", name.trim_start_matches('@')))
            }
            Channel::Id(_) => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Username(name) => f.write_str(name),
            Channel::Id(id) => write!(f, "{id}"),
        }
    }
}
