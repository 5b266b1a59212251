//! In-memory session registry and room membership index.
//!
//! Pure data behind one mutex: socket → session, room → socket set.
//! Readers get snapshot copies, so no lock is held across I/O. Empty
//! room sets are pruned so the index never leaks departed rooms.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use consult_store::Role;
use uuid::Uuid;

/// Transient per-socket state, created on a successful `join_room`.
#[derive(Clone, Debug)]
pub struct Session {
    pub socket_id:    Uuid,
    pub room_id:      String,
    pub role:         Role,
    /// Verified doctor id; `None` exactly when `role` is `Patient`.
    pub doctor_id:    Option<String>,
    pub language:     String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    rooms:    HashMap<String, HashSet<Uuid>>,
}

/// Socket → session and room → members, guarded by a single mutex.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and add its socket to the room's member set.
    /// A second `put` for the same socket replaces the old session.
    pub fn put(&self, session: Session) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.sessions.insert(session.socket_id, session.clone()) {
            // Rejoining into a different room: drop the stale membership.
            if old.room_id != session.room_id {
                prune(&mut inner.rooms, &old.room_id, &old.socket_id);
            }
        }
        inner
            .rooms
            .entry(session.room_id)
            .or_default()
            .insert(session.socket_id);
    }

    pub fn get(&self, socket_id: &Uuid) -> Option<Session> {
        self.inner.lock().unwrap().sessions.get(socket_id).cloned()
    }

    /// Remove a session and prune its room set if it becomes empty.
    /// Returns the removed session, if any.
    pub fn remove(&self, socket_id: &Uuid) -> Option<Session> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.sessions.remove(socket_id)?;
        prune(&mut inner.rooms, &session.room_id, socket_id);
        Some(session)
    }

    /// Snapshot of every session currently in the room. Order is
    /// insignificant.
    pub fn room(&self, room_id: &str) -> Vec<Session> {
        let inner = self.inner.lock().unwrap();
        inner
            .rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| inner.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True iff the room holds at least one patient and one doctor session.
    pub fn both_present(&self, room_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(members) = inner.rooms.get(room_id) else {
            return false;
        };
        let mut patient = false;
        let mut doctor = false;
        for id in members {
            match inner.sessions.get(id).map(|s| s.role) {
                Some(Role::Patient) => patient = true,
                Some(Role::Doctor)  => doctor = true,
                None => {}
            }
        }
        patient && doctor
    }

    /// Update a session's language in place. Returns false if the socket
    /// has no session.
    pub fn update_language(&self, socket_id: &Uuid, language: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.get_mut(socket_id) {
            Some(session) => {
                session.language = language.to_string();
                true
            }
            None => false,
        }
    }
}

fn prune(rooms: &mut HashMap<String, HashSet<Uuid>>, room_id: &str, socket_id: &Uuid) {
    if let Some(members) = rooms.get_mut(room_id) {
        members.remove(socket_id);
        if members.is_empty() {
            rooms.remove(room_id);
        }
    }
}
