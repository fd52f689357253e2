//! Persistent-connection gateway.
//!
//! One task per WebSocket connection. Events arrive as JSON text frames
//! ([`ClientEvent`]); pushes to the client go through an unbounded mpsc
//! channel drained by a dedicated writer task, so the delivery router
//! never blocks on a slow client.
//!
//! A connection is anonymous until its first `register` event binds it
//! to an identity in the presence registry. Disconnect (close frame,
//! socket error or stream end) removes the registration synchronously
//! before the task exits, which broadcasts the offline presence event.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use agrolink_shared::{ClientEvent, ServerEvent};
use agrolink_store::NewMessage;

use crate::api::AppState;
use crate::presence::{ConnectionHandle, PresenceRegistry};
use crate::router::DeliveryRouter;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let handle = ConnectionHandle::new(tx);
    let handle_id = handle.id;

    tracing::debug!(connection = %handle_id, "websocket connected");

    // Writer task: drain pushed events to the socket. Exits when the
    // channel closes (connection task dropped the handle) or the socket
    // rejects a frame.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode server event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(connection = %handle_id, error = %e, "websocket error");
                break;
            }
        };

        match frame {
            Message::Text(text) => match ClientEvent::from_json(text.as_str()) {
                Ok(event) => {
                    handle_event(&state.presence, &state.router, &handle, event).await;
                }
                Err(e) => {
                    // Malformed frame: report on this connection only,
                    // keep the connection up.
                    handle.push(ServerEvent::Error {
                        message: format!("unrecognized event: {e}"),
                    });
                }
            },
            Message::Close(_) => break,
            // Ping/pong handled by axum; binary frames are not part of
            // the protocol.
            _ => {}
        }
    }

    // Disconnect is the only cancellation signal: drop the presence
    // entry before this task finishes so no further routing sees it.
    if let Some(user_id) = state.presence.unregister(handle_id).await {
        tracing::info!(user = %user_id, connection = %handle_id, "user disconnected");
    } else {
        tracing::debug!(connection = %handle_id, "anonymous or superseded connection closed");
    }

    writer.abort();
}

/// Dispatch one decoded client event.
async fn handle_event(
    presence: &PresenceRegistry,
    router: &DeliveryRouter,
    handle: &ConnectionHandle,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Register { user_id } => {
            presence.register(user_id, handle.clone()).await;
        }
        ClientEvent::Send {
            sender,
            recipient,
            body,
            media_ref,
            kind,
            client_time,
        } => {
            let new = NewMessage {
                sender,
                recipient,
                kind,
                body,
                media_ref,
                client_time,
            };
            // A failed send must not look delivered: the error goes back
            // on the sending connection and nothing is pushed elsewhere.
            if let Err(e) = router.send(new).await {
                handle.push(ServerEvent::Error {
                    message: e.to_string(),
                });
            }
        }
        ClientEvent::Typing { sender, recipient } => {
            router.typing(sender, recipient).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tokio::sync::Mutex;

    use agrolink_shared::UserId;
    use agrolink_store::Database;

    use crate::router::SharedDb;

    fn setup() -> (PresenceRegistry, DeliveryRouter) {
        let db: SharedDb = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let presence = PresenceRegistry::new();
        let router = DeliveryRouter::new(db, presence.clone());
        (presence, router)
    }

    fn connection() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn register_event_binds_connection() {
        let (presence, router) = setup();
        let (handle, _rx) = connection();

        handle_event(
            &presence,
            &router,
            &handle,
            ClientEvent::Register {
                user_id: UserId::new("a"),
            },
        )
        .await;

        let bound = presence.lookup(&UserId::new("a")).await.unwrap();
        assert_eq!(bound.id, handle.id);
    }

    #[tokio::test]
    async fn send_and_receive_via_events() {
        let (presence, router) = setup();
        let (a_handle, mut a_rx) = connection();
        let (b_handle, mut b_rx) = connection();

        presence.register(UserId::new("a"), a_handle.clone()).await;
        presence.register(UserId::new("b"), b_handle).await;
        // Drain the presence event "a" saw for "b" coming online.
        let _ = a_rx.recv().await;

        handle_event(
            &presence,
            &router,
            &a_handle,
            ClientEvent::Send {
                sender: UserId::new("a"),
                recipient: UserId::new("b"),
                body: Some("hello".to_string()),
                media_ref: None,
                kind: None,
                client_time: "11:30".to_string(),
            },
        )
        .await;

        assert!(matches!(b_rx.recv().await.unwrap(), ServerEvent::Message(_)));
        assert!(matches!(
            b_rx.recv().await.unwrap(),
            ServerEvent::UnreadCountUpdate { count: 1, .. }
        ));
        // Sender got the echo, not an error.
        assert!(matches!(a_rx.recv().await.unwrap(), ServerEvent::Message(_)));
    }

    #[tokio::test]
    async fn invalid_send_reports_error_to_sender_only() {
        let (presence, router) = setup();
        let (a_handle, mut a_rx) = connection();
        let (b_handle, mut b_rx) = connection();

        presence.register(UserId::new("a"), a_handle.clone()).await;
        presence.register(UserId::new("b"), b_handle).await;
        let _ = a_rx.recv().await;

        handle_event(
            &presence,
            &router,
            &a_handle,
            ClientEvent::Send {
                sender: UserId::new("a"),
                recipient: UserId::new("b"),
                body: None,
                media_ref: None,
                kind: None,
                client_time: "11:30".to_string(),
            },
        )
        .await;

        assert!(matches!(a_rx.recv().await.unwrap(), ServerEvent::Error { .. }));
        assert!(b_rx.try_recv().is_err());
    }
}
