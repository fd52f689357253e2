//! # agrolink-store
//!
//! Durable storage for the Agrolink chat core, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the message log
//! and the chat-user directory. Conversations are not stored entities:
//! they are derived views over the message log, queried by the unordered
//! pair of participants.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
