//! # agrolink-shared
//!
//! Domain types and the realtime chat protocol shared between the
//! Agrolink store and server crates.
//!
//! The messaging core only ever handles opaque [`types::UserId`]
//! references; display attributes (name, avatar, role) are resolved from
//! the user directory at read time and carried in [`types::UserProfile`].

pub mod protocol;
pub mod types;

pub use protocol::{ClientEvent, ServerEvent};
pub use types::*;
