//! Room records and the doctor-slot claim protocol.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use consult_crypto::RoomKey;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::{Database, StoreError};

/// A persisted room: one symmetric key, at most one claiming doctor.
#[derive(Clone, Debug)]
pub struct Room {
    pub id:         String,
    pub doctor_id:  Option<String>,
    pub cipher_key: RoomKey,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct RoomStore {
    db: Arc<Database>,
}

impl RoomStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a room with a fresh cipher key and no doctor.
    pub fn create(&self) -> Result<Room, StoreError> {
        let room = Room {
            id:         Uuid::new_v4().to_string(),
            doctor_id:  None,
            cipher_key: RoomKey::generate(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, doctor_id, cipher_key, created_at, updated_at)
                 VALUES (?1, NULL, ?2, ?3, ?4)",
                params![
                    room.id,
                    room.cipher_key.to_hex(),
                    room.created_at.to_rfc3339(),
                    room.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        Ok(room)
    }

    /// Load a room by id.
    pub fn get(&self, room_id: &str) -> Result<Room, StoreError> {
        self.db.with(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, doctor_id, cipher_key, created_at, updated_at
                     FROM rooms WHERE id = ?1",
                    params![room_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;

            let (id, doctor_id, key, created_at, updated_at) = match row {
                Some(r) => r,
                None    => return Err(StoreError::NotFound),
            };

            Ok(Room {
                id,
                doctor_id,
                cipher_key: RoomKey::from_encoded(&key)?,
                created_at: parse_ts(&created_at),
                updated_at: parse_ts(&updated_at),
            })
        })
    }

    /// Atomically claim the doctor slot for `doctor_id`.
    ///
    /// Succeeds if the slot is free or already held by the same doctor;
    /// a different non-null claimant fails with `AlreadyClaimed`. The
    /// conditional update makes concurrent claims serialise at the row.
    pub fn claim_doctor(&self, room_id: &str, doctor_id: &str) -> Result<(), StoreError> {
        self.db.with(|conn| {
            let changed = conn.execute(
                "UPDATE rooms SET doctor_id = ?1, updated_at = ?2
                 WHERE id = ?3 AND (doctor_id IS NULL OR doctor_id = ?1)",
                params![doctor_id, Utc::now().to_rfc3339(), room_id],
            )?;
            if changed == 1 {
                return Ok(());
            }
            if Self::exists(conn, room_id)? {
                Err(StoreError::AlreadyClaimed)
            } else {
                Err(StoreError::NotFound)
            }
        })
    }

    /// Release the doctor slot iff `doctor_id` currently holds it.
    pub fn release_doctor(&self, room_id: &str, doctor_id: &str) -> Result<(), StoreError> {
        self.db.with(|conn| {
            let changed = conn.execute(
                "UPDATE rooms SET doctor_id = NULL, updated_at = ?1
                 WHERE id = ?2 AND doctor_id = ?3",
                params![Utc::now().to_rfc3339(), room_id, doctor_id],
            )?;
            if changed == 1 {
                return Ok(());
            }
            if Self::exists(conn, room_id)? {
                Err(StoreError::NotClaimant)
            } else {
                Err(StoreError::NotFound)
            }
        })
    }

    fn exists(conn: &rusqlite::Connection, room_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM rooms WHERE id = ?1", params![room_id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
