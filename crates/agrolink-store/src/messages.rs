//! Message log operations.
//!
//! A conversation is not a stored entity: it is the set of messages
//! whose `{sender, recipient}` equals a given unordered pair, in either
//! direction. The message table is the single source of truth; unread
//! counts are always derived, never cached here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use agrolink_shared::{MessageKind, MessageStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage};

impl Database {
    /// Persist a new message.
    ///
    /// Assigns the id, `status = sent` and the server-side `created_at`
    /// timestamp. Fails with [`StoreError::InvalidMessage`] when either
    /// identity is missing, both `body` and `media_ref` are absent, or
    /// `client_time` is empty, so a malformed send never reaches the
    /// database.
    pub fn append_message(&self, new: NewMessage) -> Result<Message> {
        if new.sender.as_str().is_empty() || new.recipient.as_str().is_empty() {
            return Err(StoreError::InvalidMessage(
                "sender and recipient are required",
            ));
        }
        if new.body.as_deref().map_or(true, str::is_empty)
            && new.media_ref.as_deref().map_or(true, str::is_empty)
        {
            return Err(StoreError::InvalidMessage(
                "either a text body or a media reference is required",
            ));
        }
        if new.client_time.is_empty() {
            return Err(StoreError::InvalidMessage("client_time is required"));
        }

        let kind = new.kind.unwrap_or(if new.body.is_some() {
            MessageKind::Text
        } else {
            MessageKind::Image
        });

        let message = Message {
            id: Uuid::new_v4(),
            sender: new.sender,
            recipient: new.recipient,
            kind,
            body: new.body,
            media_ref: new.media_ref,
            client_time: new.client_time,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender, recipient, kind, body, media_ref,
                                   client_time, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                message.sender.as_str(),
                message.recipient.as_str(),
                message.kind.as_str(),
                message.body,
                message.media_ref,
                message.client_time,
                message.status.as_str(),
                message.created_at.to_rfc3339(),
            ],
        )?;

        Ok(message)
    }

    /// All messages between the unordered pair `{a, b}`, in either
    /// direction, ordered by `created_at` ascending (rowid breaks ties
    /// between equal timestamps). Does not touch message status.
    pub fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender, recipient, kind, body, media_ref,
                    client_time, status, created_at
             FROM messages
             WHERE (sender = ?1 AND recipient = ?2)
                OR (sender = ?2 AND recipient = ?1)
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Fetch a single message by id.
    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, sender, recipient, kind, body, media_ref,
                        client_time, status, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Bulk-transition every `sent` message from `sender` to `recipient`
    /// (that exact direction) to `read`. Idempotent: reapplying affects
    /// zero rows. Returns the number of rows updated.
    pub fn mark_read(&self, sender: &UserId, recipient: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = 'read'
             WHERE sender = ?1 AND recipient = ?2 AND status = 'sent'",
            params![sender.as_str(), recipient.as_str()],
        )?;
        Ok(affected)
    }

    /// Count of messages from `sender` to `recipient` still in `sent`.
    pub fn unread_count(&self, sender: &UserId, recipient: &UserId) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE sender = ?1 AND recipient = ?2 AND status = 'sent'",
            params![sender.as_str(), recipient.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Unread counts towards `recipient`, grouped by sender.
    ///
    /// One aggregate query instead of a round-trip per contact; senders
    /// with nothing unread are simply absent from the map.
    pub fn unread_counts_for(&self, recipient: &UserId) -> Result<HashMap<UserId, i64>> {
        let mut stmt = self.conn().prepare(
            "SELECT sender, COUNT(*) FROM messages
             WHERE recipient = ?1 AND status = 'sent'
             GROUP BY sender",
        )?;

        let rows = stmt.query_map(params![recipient.as_str()], |row| {
            let sender: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((UserId(sender), count))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (sender, count) = row?;
            counts.insert(sender, count);
        }
        Ok(counts)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let recipient: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let body: Option<String> = row.get(4)?;
    let media_ref: Option<String> = row.get(5)?;
    let client_time: String = row.get(6)?;
    let status_str: String = row.get(7)?;
    let ts_str: String = row.get(8)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let kind = MessageKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown message kind: {kind_str}").into(),
        )
    })?;

    let status = MessageStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown message status: {status_str}").into(),
        )
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        sender: UserId(sender),
        recipient: UserId(recipient),
        kind,
        body,
        media_ref,
        client_time,
        status,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> Database {
        Database::open_in_memory().expect("open in-memory db")
    }

    fn text_message(sender: &str, recipient: &str, body: &str) -> NewMessage {
        NewMessage {
            sender: UserId::new(sender),
            recipient: UserId::new(recipient),
            kind: None,
            body: Some(body.to_string()),
            media_ref: None,
            client_time: "10:00".to_string(),
        }
    }

    #[test]
    fn append_assigns_sent_status_and_server_timestamp() {
        let db = open_db();
        let before = Utc::now();
        let msg = db.append_message(text_message("a", "b", "hi")).unwrap();

        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(msg.created_at >= before);

        let fetched = db.get_message(msg.id).unwrap();
        assert_eq!(fetched, msg);
    }

    #[test]
    fn append_rejects_empty_payload() {
        let db = open_db();
        let mut new = text_message("a", "b", "hi");
        new.body = None;

        let err = db.append_message(new).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMessage(_)));
    }

    #[test]
    fn append_rejects_missing_client_time() {
        let db = open_db();
        let mut new = text_message("a", "b", "hi");
        new.client_time = String::new();

        let err = db.append_message(new).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMessage(_)));
    }

    #[test]
    fn append_rejects_missing_identity() {
        let db = open_db();

        let no_sender = text_message("", "b", "hi");
        let err = db.append_message(no_sender).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMessage(_)));

        let no_recipient = text_message("a", "", "hi");
        let err = db.append_message(no_recipient).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMessage(_)));
    }

    #[test]
    fn media_message_defaults_to_image_kind() {
        let db = open_db();
        let msg = db
            .append_message(NewMessage {
                sender: UserId::new("a"),
                recipient: UserId::new("b"),
                kind: None,
                body: None,
                media_ref: Some("uploads/abc.jpg".to_string()),
                client_time: "10:01".to_string(),
            })
            .unwrap();
        assert_eq!(msg.kind, MessageKind::Image);
    }

    #[test]
    fn conversation_is_ordered_and_bidirectional() {
        let db = open_db();
        let a = UserId::new("a");
        let b = UserId::new("b");

        db.append_message(text_message("a", "b", "one")).unwrap();
        db.append_message(text_message("b", "a", "two")).unwrap();
        db.append_message(text_message("a", "b", "three")).unwrap();
        // Unrelated pair must not leak in.
        db.append_message(text_message("a", "c", "noise")).unwrap();

        let convo = db.conversation(&a, &b).unwrap();
        assert_eq!(
            convo.iter().map(|m| m.body.as_deref().unwrap()).collect::<Vec<_>>(),
            vec!["one", "two", "three"]
        );
        for pair in convo.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }

        // Same view from either side of the pair.
        assert_eq!(db.conversation(&b, &a).unwrap(), convo);
    }

    #[test]
    fn mark_read_is_idempotent_and_directional() {
        let db = open_db();
        let a = UserId::new("a");
        let b = UserId::new("b");

        db.append_message(text_message("a", "b", "m1")).unwrap();
        db.append_message(text_message("a", "b", "m2")).unwrap();
        db.append_message(text_message("b", "a", "reply")).unwrap();

        assert_eq!(db.unread_count(&a, &b).unwrap(), 2);

        assert_eq!(db.mark_read(&a, &b).unwrap(), 2);
        assert_eq!(db.unread_count(&a, &b).unwrap(), 0);

        // Reapplying has no further effect.
        assert_eq!(db.mark_read(&a, &b).unwrap(), 0);
        assert_eq!(db.unread_count(&a, &b).unwrap(), 0);

        // The opposite direction is untouched.
        assert_eq!(db.unread_count(&b, &a).unwrap(), 1);
    }

    #[test]
    fn unread_counts_grouped_by_sender() {
        let db = open_db();
        let me = UserId::new("me");

        db.append_message(text_message("a", "me", "1")).unwrap();
        db.append_message(text_message("a", "me", "2")).unwrap();
        db.append_message(text_message("b", "me", "3")).unwrap();
        db.append_message(text_message("me", "a", "out")).unwrap();

        let counts = db.unread_counts_for(&me).unwrap();
        assert_eq!(counts.get(&UserId::new("a")), Some(&2));
        assert_eq!(counts.get(&UserId::new("b")), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn get_message_unknown_id_is_not_found() {
        let db = open_db();
        let err = db.get_message(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
