//! Single-flight cache for synthesized question audio.
//!
//! Keyed by `voice|language|cache-key-or-text`, matching what the speech
//! service sends to the synthesis endpoint. A key is fetched at most once:
//! concurrent requests for a pending key attach to the in-flight fetch
//! instead of issuing another one. Entries are never evicted during a
//! session; the question list bounds the cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Build the cache key. The explicit cache key (usually the question id)
/// wins over the prompt text so edited prompts still reuse the same clip.
pub fn cache_key(voice: &str, language: &str, text: &str, explicit: Option<&str>) -> String {
    format!("{voice}|{language}|{}", explicit.unwrap_or(text))
}

/// Result of a cache probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Bytes are already cached.
    Hit(Arc<[u8]>),
    /// Nothing cached and nothing in flight; the caller must start a fetch.
    Miss,
    /// A fetch for this key is already running; await its completion.
    InFlight,
}

#[derive(Default)]
pub struct TtsCache {
    entries: HashMap<String, Arc<[u8]>>,
    in_flight: HashSet<String>,
}

impl TtsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &str) -> Lookup {
        if let Some(bytes) = self.entries.get(key) {
            return Lookup::Hit(bytes.clone());
        }
        if self.in_flight.contains(key) {
            return Lookup::InFlight;
        }
        Lookup::Miss
    }

    /// Record that a fetch for `key` has been dispatched. Returns false if
    /// one was already pending, in which case no new fetch may be issued.
    pub fn begin_fetch(&mut self, key: &str) -> bool {
        self.in_flight.insert(key.to_string())
    }

    /// Store fetched bytes and clear the pending marker.
    pub fn complete(&mut self, key: &str, bytes: Vec<u8>) -> Arc<[u8]> {
        self.in_flight.remove(key);
        let bytes: Arc<[u8]> = bytes.into();
        self.entries.insert(key.to_string(), bytes.clone());
        bytes
    }

    /// Clear the pending marker after a failed fetch so a later `speak`
    /// can try the key again.
    pub fn fail(&mut self, key: &str) {
        self.in_flight.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
