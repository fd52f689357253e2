//! Realtime chat protocol.
//!
//! Events are exchanged as JSON text frames over the persistent
//! WebSocket connection. Both enums are internally tagged on `"event"`
//! so a frame always self-describes, e.g.
//! `{"event":"typing","sender":"a","recipient":"b"}`.

use serde::{Deserialize, Serialize};

use crate::types::{MessageKind, MessageView, UserId};

/// Events a client may send over its persistent connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind this connection to an identity. Must precede `send`/`typing`.
    Register { user_id: UserId },

    /// Send a message to another user. Exactly one of `body`/`media_ref`
    /// is required; the server assigns id, status and `created_at`.
    Send {
        sender: UserId,
        recipient: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_ref: Option<String>,
        #[serde(default)]
        kind: Option<MessageKind>,
        client_time: String,
    },

    /// Ephemeral typing indicator. Never persisted.
    Typing { sender: UserId, recipient: UserId },
}

/// Events the server pushes to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Broadcast to everyone when a user comes online or goes offline.
    Presence { user_id: UserId, online: bool },

    /// A newly persisted message, pushed to the recipient (if connected)
    /// and echoed to the sender's own connection.
    Message(MessageView),

    /// Cache hint for the recipient: how many of `sender`'s messages to
    /// them are still unread. Recomputed from the store on every change.
    UnreadCountUpdate { sender: UserId, count: i64 },

    /// Relayed typing indicator.
    Typing { sender: UserId, recipient: UserId },

    /// Reported back on the offending connection only; the connection
    /// stays open.
    Error { message: String },
}

impl ClientEvent {
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
