use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = opaque id assigned by the surrounding application's
// user directory. The chat core stores and echoes it, never invents it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Message payload kind: plain text or a reference to an uploaded image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

/// Delivery state of a message.
///
/// Transitions are monotonic: `sending -> sent -> read`, never backwards.
/// `Sending` is a client-local placeholder for a message the store has not
/// acknowledged yet; anything the store persists starts at `Sent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// Display attributes for a user, resolved from the directory at read time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
    pub role: String,
}

/// A persisted message with sender/recipient profiles resolved.
///
/// This is the shape both gateways hand to clients: the HTTP endpoints
/// return it as JSON and the WebSocket gateway wraps it in
/// [`crate::protocol::ServerEvent::Message`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageView {
    pub id: Uuid,
    pub sender: UserProfile,
    pub recipient: UserProfile,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub media_ref: Option<String>,
    /// Client-supplied display time; never used for ordering.
    pub client_time: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for s in [MessageStatus::Sending, MessageStatus::Sent, MessageStatus::Read] {
            assert_eq!(MessageStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MessageStatus::parse("delivered"), None);
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MessageKind::Image).unwrap(), "\"image\"");
    }

    #[test]
    fn user_id_is_transparent() {
        let id = UserId::new("u-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"u-42\"");
    }
}
