//! Append-only encrypted message log.
//!
//! Bodies are encrypted with the room key before they touch disk and
//! decrypted on the way out, so callers only ever see plaintext. The
//! store assigns the authoritative timestamp and enforces the anonymity
//! rule: a patient message never carries a sender id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use consult_crypto::{decrypt, encrypt, RoomKey};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Database, StoreError};

/// Who sent a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Doctor  => "doctor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored message, decrypted for the caller.
#[derive(Clone, Debug)]
pub struct MessageRecord {
    pub id:                 String,
    pub room_id:            String,
    pub sender_role:        Role,
    pub sender_id:          Option<String>,
    pub content:            String,
    pub translated_content: Option<String>,
    pub language:           String,
    pub target_language:    Option<String>,
    pub timestamp:          DateTime<Utc>,
    pub is_audio_origin:    bool,
}

pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Encrypt and persist one message; returns the record with decrypted
    /// content and the store-assigned timestamp.
    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &self,
        room_id:            &str,
        sender_role:        Role,
        sender_id:          Option<&str>,
        content:            &str,
        language:           &str,
        target_language:    Option<&str>,
        translated_content: Option<&str>,
        is_audio_origin:    bool,
        key:                &RoomKey,
    ) -> Result<MessageRecord, StoreError> {
        match (sender_role, sender_id) {
            (Role::Patient, Some(_)) => {
                return Err(StoreError::InvalidArgument(
                    "patient messages must not carry a sender id".into(),
                ));
            }
            (Role::Doctor, None) => {
                return Err(StoreError::InvalidArgument(
                    "doctor messages require a sender id".into(),
                ));
            }
            _ => {}
        }

        let record = MessageRecord {
            id:                 Uuid::new_v4().to_string(),
            room_id:            room_id.to_string(),
            sender_role,
            sender_id:          sender_id.map(str::to_string),
            content:            content.to_string(),
            translated_content: translated_content.map(str::to_string),
            language:           language.to_string(),
            target_language:    target_language.map(str::to_string),
            timestamp:          Utc::now(),
            is_audio_origin,
        };

        let ciphertext = encrypt(content, key);
        let translated_ciphertext = translated_content.map(|t| encrypt(t, key));

        self.db.with(|conn| {
            if !room_exists(conn, room_id)? {
                return Err(StoreError::NotFound);
            }
            conn.execute(
                "INSERT INTO messages
                    (id, room_id, sender_role, sender_id, content, translated_content,
                     language, target_language, timestamp, is_audio_origin)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id,
                    record.room_id,
                    record.sender_role.as_str(),
                    record.sender_id,
                    ciphertext,
                    translated_ciphertext,
                    record.language,
                    record.target_language,
                    record.timestamp.timestamp_millis(),
                    record.is_audio_origin as i64,
                ],
            )?;
            Ok(())
        })?;

        Ok(record)
    }

    /// Read one reverse-chronological page, newest first.
    ///
    /// `limit` must be in `1..=100`; `offset` skips records from the
    /// newest end. A row that fails to decrypt fails the whole page.
    pub fn page(
        &self,
        room_id: &str,
        key:     &RoomKey,
        limit:   u32,
        offset:  u32,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        if !(1..=100).contains(&limit) {
            return Err(StoreError::InvalidArgument(format!(
                "limit must be between 1 and 100, got {limit}"
            )));
        }

        self.db.with(|conn| {
            if !room_exists(conn, room_id)? {
                return Err(StoreError::NotFound);
            }

            let mut stmt = conn.prepare(
                "SELECT id, room_id, sender_role, sender_id, content, translated_content,
                        language, target_language, timestamp, is_audio_origin
                 FROM messages WHERE room_id = ?1
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;

            let rows = stmt.query_map(params![room_id, limit, offset], |row| {
                Ok(RawRow {
                    id:                 row.get(0)?,
                    room_id:            row.get(1)?,
                    sender_role:        row.get(2)?,
                    sender_id:          row.get(3)?,
                    content:            row.get(4)?,
                    translated_content: row.get(5)?,
                    language:           row.get(6)?,
                    target_language:    row.get(7)?,
                    timestamp_ms:       row.get(8)?,
                    is_audio_origin:    row.get::<_, i64>(9)? != 0,
                })
            })?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?.decrypt(key)?);
            }
            Ok(records)
        })
    }
}

struct RawRow {
    id:                 String,
    room_id:            String,
    sender_role:        String,
    sender_id:          Option<String>,
    content:            String,
    translated_content: Option<String>,
    language:           String,
    target_language:    Option<String>,
    timestamp_ms:       i64,
    is_audio_origin:    bool,
}

impl RawRow {
    fn decrypt(self, key: &RoomKey) -> Result<MessageRecord, StoreError> {
        let translated_content = match self.translated_content {
            Some(body) => Some(decrypt(&body, key)?),
            None       => None,
        };
        Ok(MessageRecord {
            id:                 self.id,
            room_id:            self.room_id,
            sender_role:        match self.sender_role.as_str() {
                "doctor" => Role::Doctor,
                _        => Role::Patient,
            },
            sender_id:          self.sender_id,
            content:            decrypt(&self.content, key)?,
            translated_content,
            language:           self.language,
            target_language:    self.target_language,
            timestamp:          DateTime::from_timestamp_millis(self.timestamp_ms)
                .unwrap_or_else(Utc::now),
            is_audio_origin:    self.is_audio_origin,
        })
    }
}

fn room_exists(conn: &rusqlite::Connection, room_id: &str) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM rooms WHERE id = ?1", params![room_id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}
