//! Durable storage for consult rooms.
//!
//! | Module    | Role                                                    |
//! |-----------|---------------------------------------------------------|
//! | `db`      | Shared SQLite handle, schema bootstrap                  |
//! | `room`    | Room records: create, load, claim/release doctor slot   |
//! | `message` | Append-only encrypted message log with paged reads      |
//! | `cache`   | Content-addressed artifact cache (translations, audio)  |
//!
//! Rooms and messages are encrypted at rest with the room's key
//! (`consult-crypto`); everything this crate returns is already
//! decrypted so callers never touch ciphertext.

#![deny(unsafe_code)]

pub mod cache;
pub mod db;
mod error;
pub mod message;
pub mod room;

pub use cache::{ArtifactCache, ArtifactKind, MemoryCache};
pub use db::Database;
pub use error::StoreError;
pub use message::{MessageRecord, MessageStore, Role};
pub use room::{Room, RoomStore};
