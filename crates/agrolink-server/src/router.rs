//! Delivery router.
//!
//! Single funnel for every send, regardless of transport: persist first,
//! then best-effort realtime push. Both the HTTP endpoint and the
//! WebSocket gateway delegate here so status and push semantics cannot
//! diverge between the two paths.

use std::sync::Arc;

use tokio::sync::Mutex;

use agrolink_shared::{MessageView, ServerEvent, UserId};
use agrolink_store::{Database, Message, NewMessage};

use crate::error::ServerError;
use crate::presence::PresenceRegistry;

/// The store handle shared by all connection tasks. The database provides
/// its own internal consistency; the mutex only serializes access to the
/// single connection.
pub type SharedDb = Arc<Mutex<Database>>;

#[derive(Clone)]
pub struct DeliveryRouter {
    db: SharedDb,
    presence: PresenceRegistry,
}

impl DeliveryRouter {
    pub fn new(db: SharedDb, presence: PresenceRegistry) -> Self {
        Self { db, presence }
    }

    /// Send a message: persist, route to the recipient's live connection,
    /// echo to the sender's own connection.
    ///
    /// A persistence failure surfaces to the caller and emits no push
    /// events; retrying is the caller's responsibility. Pushes happen
    /// only after the durable write succeeded, never optimistically, and
    /// never block on the receiving connection.
    pub async fn send(&self, new: NewMessage) -> Result<MessageView, ServerError> {
        let (view, unread) = {
            let db = self.db.lock().await;
            let message = db.append_message(new)?;
            let unread = db.unread_count(&message.sender, &message.recipient)?;
            (resolve_view(&db, message)?, unread)
        };

        tracing::debug!(
            id = %view.id,
            sender = %view.sender.id,
            recipient = %view.recipient.id,
            "message persisted"
        );

        // Route: push to the recipient if they hold a live connection,
        // along with a fresh unread count for this sender. An offline
        // recipient discovers the message on their next conversation
        // fetch.
        if let Some(recipient) = self.presence.lookup(&view.recipient.id).await {
            recipient.push(ServerEvent::Message(view.clone()));
            recipient.push(ServerEvent::UnreadCountUpdate {
                sender: view.sender.id.clone(),
                count: unread,
            });
        }

        // Echo: reflect the persisted message on the sender's own
        // connection, if any.
        if let Some(sender) = self.presence.lookup(&view.sender.id).await {
            sender.push(ServerEvent::Message(view.clone()));
        }

        Ok(view)
    }

    /// Relay a typing indicator to the recipient's live connection.
    ///
    /// Never persisted: if the recipient is offline the signal is
    /// silently dropped. No retry, no queue, no error.
    pub async fn typing(&self, sender: UserId, recipient: UserId) {
        if let Some(handle) = self.presence.lookup(&recipient).await {
            handle.push(ServerEvent::Typing { sender, recipient });
        }
    }
}

/// Attach resolved sender/recipient profiles to a persisted message.
pub fn resolve_view(db: &Database, message: Message) -> Result<MessageView, ServerError> {
    let sender = db.resolve_profile(&message.sender)?;
    let recipient = db.resolve_profile(&message.recipient)?;
    Ok(MessageView {
        id: message.id,
        sender,
        recipient,
        kind: message.kind,
        body: message.body,
        media_ref: message.media_ref,
        client_time: message.client_time,
        status: message.status,
        created_at: message.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    use agrolink_shared::MessageStatus;

    use crate::presence::ConnectionHandle;

    fn setup() -> (DeliveryRouter, SharedDb, PresenceRegistry) {
        let db: SharedDb = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let presence = PresenceRegistry::new();
        let router = DeliveryRouter::new(db.clone(), presence.clone());
        (router, db, presence)
    }

    fn new_message(sender: &str, recipient: &str, body: &str) -> NewMessage {
        NewMessage {
            sender: UserId::new(sender),
            recipient: UserId::new(recipient),
            kind: None,
            body: Some(body.to_string()),
            media_ref: None,
            client_time: "10:00".to_string(),
        }
    }

    async fn connect(
        presence: &PresenceRegistry,
        user: &str,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        presence
            .register(UserId::new(user), ConnectionHandle::new(tx))
            .await;
        rx
    }

    #[tokio::test]
    async fn offline_recipient_gets_no_push() {
        let (router, db, _presence) = setup();

        let view = router.send(new_message("a", "b", "hi")).await.unwrap();
        assert_eq!(view.status, MessageStatus::Sent);

        let db = db.lock().await;
        assert_eq!(
            db.unread_count(&UserId::new("a"), &UserId::new("b")).unwrap(),
            1
        );
        // Message waits in the store; nothing else to observe since no
        // connection exists to push to.
        assert_eq!(db.conversation(&UserId::new("a"), &UserId::new("b")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn online_recipient_gets_message_and_unread_update() {
        let (router, _db, presence) = setup();
        let mut b_rx = connect(&presence, "b").await;

        let view = router.send(new_message("a", "b", "hi")).await.unwrap();

        match b_rx.recv().await.unwrap() {
            ServerEvent::Message(pushed) => assert_eq!(pushed, view),
            other => panic!("expected message push, got {other:?}"),
        }
        match b_rx.recv().await.unwrap() {
            ServerEvent::UnreadCountUpdate { sender, count } => {
                assert_eq!(sender, UserId::new("a"));
                assert_eq!(count, 1);
            }
            other => panic!("expected unread update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sender_connection_receives_echo() {
        let (router, _db, presence) = setup();
        let mut a_rx = connect(&presence, "a").await;

        let view = router.send(new_message("a", "b", "hi")).await.unwrap();

        match a_rx.recv().await.unwrap() {
            ServerEvent::Message(pushed) => assert_eq!(pushed, view),
            other => panic!("expected echo, got {other:?}"),
        }
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_persistence_emits_no_push() {
        let (router, _db, presence) = setup();
        let mut b_rx = connect(&presence, "b").await;

        let mut invalid = new_message("a", "b", "");
        invalid.body = None;

        let err = router.send(invalid).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_is_relayed_only_when_online() {
        let (router, _db, presence) = setup();

        // Offline: silently dropped.
        router.typing(UserId::new("a"), UserId::new("b")).await;

        let mut b_rx = connect(&presence, "b").await;
        router.typing(UserId::new("a"), UserId::new("b")).await;

        match b_rx.recv().await.unwrap() {
            ServerEvent::Typing { sender, recipient } => {
                assert_eq!(sender, UserId::new("a"));
                assert_eq!(recipient, UserId::new("b"));
            }
            other => panic!("expected typing relay, got {other:?}"),
        }
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn view_resolves_directory_profiles() {
        let (router, db, _presence) = setup();
        {
            let db = db.lock().await;
            db.upsert_user(&agrolink_store::ChatUser {
                id: UserId::new("a"),
                name: "Asha".to_string(),
                role: "farmer".to_string(),
                avatar: None,
                email: "asha@example.com".to_string(),
                created_at: chrono::Utc::now(),
            })
            .unwrap();
        }

        let view = router.send(new_message("a", "b", "hi")).await.unwrap();
        assert_eq!(view.sender.name, "Asha");
        // Unknown recipient falls back to echoing the id.
        assert_eq!(view.recipient.name, "b");
    }
}
