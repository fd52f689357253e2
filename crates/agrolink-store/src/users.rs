//! Chat-user directory operations.
//!
//! The surrounding application is the authority on identities; this
//! table is its synced projection. Messages store only ids, and profile
//! attributes are resolved from here at read time.

use chrono::{DateTime, Utc};
use rusqlite::params;

use agrolink_shared::{UserId, UserProfile};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ChatUser;

impl Database {
    /// Insert or update a directory entry (keyed on the external id).
    pub fn upsert_user(&self, user: &ChatUser) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, role, avatar, email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 role = excluded.role,
                 avatar = excluded.avatar,
                 email = excluded.email",
            params![
                user.id.as_str(),
                user.name,
                user.role,
                user.avatar,
                user.email,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single directory entry.
    pub fn get_user(&self, id: &UserId) -> Result<ChatUser> {
        self.conn()
            .query_row(
                "SELECT id, name, role, avatar, email, created_at
                 FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All known directory entries, ordered by name.
    pub fn list_users(&self) -> Result<Vec<ChatUser>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, role, avatar, email, created_at
             FROM users ORDER BY name ASC",
        )?;

        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Resolve display attributes for a user id.
    ///
    /// Unknown ids resolve to a bare profile echoing the id, so a
    /// directory that lags behind the application never breaks message
    /// delivery.
    pub fn resolve_profile(&self, id: &UserId) -> Result<UserProfile> {
        match self.get_user(id) {
            Ok(user) => Ok(user.profile()),
            Err(StoreError::NotFound) => Ok(UserProfile {
                id: id.clone(),
                name: id.to_string(),
                avatar: None,
                role: String::new(),
            }),
            Err(e) => Err(e),
        }
    }
}

impl ChatUser {
    /// The display projection handed to clients.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            role: self.role.clone(),
        }
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatUser> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let role: String = row.get(2)?;
    let avatar: Option<String> = row.get(3)?;
    let email: String = row.get(4)?;
    let ts_str: String = row.get(5)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ChatUser {
        id: UserId(id),
        name,
        role,
        avatar,
        email,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str) -> ChatUser {
        ChatUser {
            id: UserId::new(id),
            name: name.to_string(),
            role: "farmer".to_string(),
            avatar: None,
            email: format!("{id}@example.com"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_overwrites_existing_entry() {
        let db = Database::open_in_memory().unwrap();

        db.upsert_user(&user("u1", "Asha")).unwrap();
        let mut updated = user("u1", "Asha Rao");
        updated.avatar = Some("https://example.com/a.jpg".to_string());
        db.upsert_user(&updated).unwrap();

        let fetched = db.get_user(&UserId::new("u1")).unwrap();
        assert_eq!(fetched.name, "Asha Rao");
        assert_eq!(fetched.avatar.as_deref(), Some("https://example.com/a.jpg"));
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn unknown_profile_falls_back_to_id() {
        let db = Database::open_in_memory().unwrap();
        let profile = db.resolve_profile(&UserId::new("ghost")).unwrap();
        assert_eq!(profile.name, "ghost");
        assert!(profile.avatar.is_none());
    }

    #[test]
    fn get_user_unknown_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.get_user(&UserId::new("missing")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
