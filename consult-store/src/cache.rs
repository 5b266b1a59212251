//! Content-addressed artifact cache.
//!
//! Keys are `<kind>:<sha256 of the source text>:<language>`; values are
//! opaque bytes (translated text, synthesized audio). Lookups that fail
//! for any reason behave as misses; callers fall through to the
//! generator either way, and the failure is only logged.
//!
//! [`ArtifactCache`] is the seam for an external cache (e.g. Redis);
//! [`MemoryCache`] is the built-in process-local implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// What kind of artifact a cache entry holds; fixes the TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Translated message text. TTL 7 days.
    Translation,
    /// Synthesized speech audio. TTL 24 hours.
    Tts,
}

impl ArtifactKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Tts         => "tts",
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            Self::Translation => Duration::from_secs(7 * 24 * 3600),
            Self::Tts         => Duration::from_secs(24 * 3600),
        }
    }
}

/// Build the content-addressed key for an artifact.
pub fn cache_key(kind: ArtifactKind, content: &str, lang: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{}:{}:{}", kind.prefix(), hex::encode(digest), lang)
}

/// The cache abstraction the gateways program against.
pub trait ArtifactCache: Send + Sync {
    fn get(&self, kind: ArtifactKind, content: &str, lang: &str) -> Option<Vec<u8>>;
    fn put(&self, kind: ArtifactKind, content: &str, lang: &str, value: Vec<u8>);
    /// Drop every entry whose key starts with `prefix`.
    fn invalidate_prefix(&self, prefix: &str);
}

// ─── MemoryCache ─────────────────────────────────────────────────────────────

struct Entry {
    expires_at: Instant,
    value:      Vec<u8>,
}

/// Process-local cache with lazy expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn put_with_ttl(&self, kind: ArtifactKind, content: &str, lang: &str, value: Vec<u8>, ttl: Duration) {
        let key = cache_key(kind, content, lang);
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key, Entry { expires_at: Instant::now() + ttl, value });
    }
}

impl ArtifactCache for MemoryCache {
    fn get(&self, kind: ArtifactKind, content: &str, lang: &str) -> Option<Vec<u8>> {
        let key = cache_key(kind, content, lang);
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(e) => {
                log::warn!("[cache] lock poisoned, treating as miss: {e}");
                return None;
            }
        };
        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    fn put(&self, kind: ArtifactKind, content: &str, lang: &str, value: Vec<u8>) {
        let key = cache_key(kind, content, lang);
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(e) => {
                log::warn!("[cache] lock poisoned, dropping put: {e}");
                return;
            }
        };
        entries.insert(key, Entry { expires_at: Instant::now() + kind.ttl(), value });
    }

    fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(e) => {
                log::warn!("[cache] lock poisoned, dropping invalidate: {e}");
                return;
            }
        };
        entries.retain(|key, _| !key.starts_with(prefix));
    }
}
