//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be
//! handed directly to the HTTP/WebSocket layer.

use agrolink_shared::{MessageKind, MessageStatus, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ChatUser
// ---------------------------------------------------------------------------

/// A directory entry for a user known to the chat core.
///
/// The surrounding application owns these identities; this table is its
/// synced projection so contact lists and profile resolution do not need
/// a network round-trip per message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatUser {
    pub id: UserId,
    pub name: String,
    /// e.g. "farmer", "consultant", "admin".
    pub role: String,
    pub avatar: Option<String>,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single persisted chat message between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier, assigned at persistence time.
    pub id: Uuid,
    pub sender: UserId,
    pub recipient: UserId,
    pub kind: MessageKind,
    /// Text payload. Exactly one of `body`/`media_ref` is set.
    pub body: Option<String>,
    /// Opaque reference returned by the media-upload path.
    pub media_ref: Option<String>,
    /// Client-supplied display time; not used for ordering.
    pub client_time: String,
    pub status: MessageStatus,
    /// Server-assigned persistence timestamp; orders the conversation.
    pub created_at: DateTime<Utc>,
}

/// Input for [`crate::Database::append_message`]: everything the client
/// supplies. Id, status and `created_at` are assigned by the store.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub sender: UserId,
    pub recipient: UserId,
    #[serde(default)]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media_ref: Option<String>,
    pub client_time: String,
}
