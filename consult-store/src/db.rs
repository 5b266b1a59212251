//! Shared SQLite handle and schema bootstrap.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::StoreError;

/// One process-wide SQLite connection behind a mutex.
///
/// SQLite serialises writers anyway; a single shared connection keeps the
/// claim/release conditional updates atomic without WAL gymnastics. All
/// store calls are subsecond and non-yielding.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and bootstrap the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// An ephemeral in-memory database (tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "PRAGMA foreign_keys = OFF;
            CREATE TABLE IF NOT EXISTS doctors (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                password_digest TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                password_digest TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS rooms (
                id         TEXT PRIMARY KEY,
                doctor_id  TEXT REFERENCES doctors(id),
                cipher_key TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id                 TEXT PRIMARY KEY,
                room_id            TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                sender_role        TEXT NOT NULL CHECK (sender_role IN ('patient', 'doctor')),
                sender_id          TEXT,
                content            TEXT NOT NULL,
                translated_content TEXT,
                language           TEXT NOT NULL,
                target_language    TEXT,
                timestamp          INTEGER NOT NULL,
                is_audio_origin    INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_messages_room      ON messages(room_id);
            CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
            CREATE INDEX IF NOT EXISTS idx_rooms_doctor       ON rooms(doctor_id);
            CREATE INDEX IF NOT EXISTS idx_doctors_email      ON doctors(email);
            CREATE INDEX IF NOT EXISTS idx_users_email        ON users(email);",
        )
    }

    /// Run `f` with the connection locked.
    pub(crate) fn with<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }
}
