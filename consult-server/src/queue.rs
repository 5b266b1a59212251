//! Per-room offline message queue.
//!
//! Plaintext snapshots of messages sent while no peer was present,
//! drained in FIFO order when a peer next joins. Process-local only: a
//! restart loses queued entries. Each room's queue is bounded; on
//! overflow the oldest entry is dropped and a warning logged.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use consult_store::Role;

/// Snapshot of an undelivered message.
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    pub content:     String,
    pub sender_role: Role,
    pub sender_id:   Option<String>,
    pub language:    String,
    pub timestamp:   DateTime<Utc>,
}

pub struct OfflineQueue {
    cap:    usize,
    queues: Mutex<HashMap<String, VecDeque<QueuedMessage>>>,
}

impl OfflineQueue {
    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1), queues: Mutex::new(HashMap::new()) }
    }

    /// Append a message for later delivery, evicting the oldest entry if
    /// the room's queue is full.
    pub fn enqueue(&self, room_id: &str, entry: QueuedMessage) {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(room_id.to_string()).or_default();
        if queue.len() >= self.cap {
            queue.pop_front();
            tracing::warn!("[queue] room {room_id} offline queue full, dropped oldest entry");
        }
        queue.push_back(entry);
    }

    /// Return and remove every queued entry for the room, oldest first.
    pub fn drain(&self, room_id: &str) -> Vec<QueuedMessage> {
        let mut queues = self.queues.lock().unwrap();
        queues
            .remove(room_id)
            .map(|queue| queue.into_iter().collect())
            .unwrap_or_default()
    }
}
