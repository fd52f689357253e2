//! Presence registry.
//!
//! Process-wide, in-memory mapping from user id to the live connection
//! handle. The map is the only structure mutated concurrently by many
//! connection tasks, so every operation goes through a single
//! mutex-guarded entry point; the raw map is never exposed.
//!
//! The registry is rebuilt empty on every process restart: all users are
//! offline until they re-register. That matches the original deployment
//! and is deliberate (see DESIGN.md).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use agrolink_shared::{ServerEvent, UserId};

/// Push side of one live connection.
///
/// Cloning shares the same underlying channel; the `id` identifies the
/// physical connection so a superseded handle can be told apart from the
/// one currently registered for an identity.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }

    /// Fire-and-forget push. A send error means the connection task is
    /// already gone; delivery is at-most-once by design, so the event is
    /// simply dropped.
    pub fn push(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

/// Cloneable handle to the shared presence map.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<HashMap<UserId, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `handle`, replacing any previous registration.
    ///
    /// Last registration wins: a prior handle for the same identity is
    /// silently dropped, not notified. Broadcasts an online presence
    /// event to every other registered connection.
    pub async fn register(&self, user_id: UserId, handle: ConnectionHandle) {
        let mut map = self.inner.lock().await;
        let superseded = map.insert(user_id.clone(), handle).is_some();

        tracing::info!(user = %user_id, superseded, "user registered");

        let event = ServerEvent::Presence {
            user_id: user_id.clone(),
            online: true,
        };
        for (uid, other) in map.iter() {
            if *uid != user_id {
                other.push(event.clone());
            }
        }
    }

    /// Remove the registration owned by this physical connection.
    ///
    /// Reverse lookup by handle id: if the identity is still bound to
    /// this handle, the entry is removed, an offline presence event is
    /// broadcast exactly once, and the identity is returned. If the
    /// handle was superseded by a newer registration this is a no-op.
    pub async fn unregister(&self, handle_id: Uuid) -> Option<UserId> {
        let mut map = self.inner.lock().await;

        let user_id = map
            .iter()
            .find(|(_, handle)| handle.id == handle_id)
            .map(|(uid, _)| uid.clone())?;

        map.remove(&user_id);
        tracing::info!(user = %user_id, "user unregistered");

        let event = ServerEvent::Presence {
            user_id: user_id.clone(),
            online: false,
        };
        for other in map.values() {
            other.push(event.clone());
        }

        Some(user_id)
    }

    /// The live handle for `user_id`, or `None` when offline.
    pub async fn lookup(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.inner.lock().await.get(user_id).cloned()
    }

    /// Snapshot of all currently online identities.
    pub async fn online_users(&self) -> HashSet<UserId> {
        self.inner.lock().await.keys().cloned().collect()
    }
}
