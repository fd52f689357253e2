//! Contact list aggregation.
//!
//! Merges three sources for the requesting user: static profile data
//! from the directory, per-sender unread counts from the message store
//! (one aggregate query, not a round-trip per contact), and the live
//! online flag from the presence registry. The store and the registry
//! can disagree at any instant; the snapshot taken here is best-effort
//! and clients refresh it via presence events.

use serde::Serialize;

use agrolink_shared::UserId;

use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::router::SharedDb;

/// One row of the contact list.
#[derive(Debug, Clone, Serialize)]
pub struct ContactEntry {
    pub id: UserId,
    pub name: String,
    pub role: String,
    pub avatar: Option<String>,
    pub unread_count: i64,
    pub online: bool,
}

/// Every directory user except the requester, with unread count and
/// online flag.
pub async fn contacts(
    db: &SharedDb,
    presence: &PresenceRegistry,
    requester: &UserId,
) -> Result<Vec<ContactEntry>, ServerError> {
    let (users, unread) = {
        let db = db.lock().await;
        (db.list_users()?, db.unread_counts_for(requester)?)
    };
    let online = presence.online_users().await;

    Ok(users
        .into_iter()
        .filter(|user| user.id != *requester)
        .map(|user| ContactEntry {
            unread_count: unread.get(&user.id).copied().unwrap_or(0),
            online: online.contains(&user.id),
            id: user.id,
            name: user.name,
            role: user.role,
            avatar: user.avatar,
        })
        .collect())
}
