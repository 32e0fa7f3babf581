//! Speech playback for question prompts.
//!
//! At most one clip plays at a time. Every `speak` call takes a fresh
//! generation token; completions carrying a stale token are discarded, so a
//! new `speak` silently cancels the previous clip's callbacks instead of
//! tearing anything down. Fetch failures are reported the same way clip
//! completion is, which lets the orchestrator treat a broken speaker
//! exactly like a finished one and keep the interview moving.

pub mod cache;
#[cfg(test)]
mod tests;

use crate::config::VoiceConfig;
use crate::error::PlaybackError;
use cache::{Lookup, TtsCache};
use std::sync::Arc;

/// Platform collaborator that plays a synthesized clip. Implementations
/// must report completion or failure back to the engine (tagged with the
/// generation passed here) and must treat `stop` as idempotent.
pub trait AudioSink: Send {
    fn play(&mut self, generation: u64, clip: Arc<[u8]>) -> Result<(), PlaybackError>;
    fn stop(&mut self);
}

/// What the engine has to do to fulfil a `speak` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakDispatch {
    /// Cached clip; stop the current clip and play this one.
    Play { generation: u64, clip: Arc<[u8]> },
    /// Start a synthesis fetch for `key`.
    Fetch {
        generation: u64,
        key: String,
        text: String,
    },
    /// A fetch for the same key is already in flight; its completion will
    /// serve this generation.
    Joined { generation: u64, key: String },
}

/// Outcome of a completed fetch, resolved against the current generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Play { generation: u64, clip: Arc<[u8]> },
    Failed { generation: u64, error: PlaybackError },
}

struct CurrentClip {
    generation: u64,
    key: String,
}

/// Owns the clip cache and the supersession bookkeeping. The service is a
/// pure state machine; the engine performs the actual fetch and playback
/// and routes completions back in.
pub struct SpeechService {
    voice: String,
    language: String,
    cache: TtsCache,
    generation: u64,
    current: Option<CurrentClip>,
}

impl SpeechService {
    pub fn new(voice: &VoiceConfig) -> Self {
        Self {
            voice: voice.voice_id.clone(),
            language: voice.language.clone(),
            cache: TtsCache::new(),
            generation: 0,
            current: None,
        }
    }

    /// Generation of the clip the engine should currently honor.
    pub fn current_generation(&self) -> Option<u64> {
        self.current.as_ref().map(|c| c.generation)
    }

    /// Request playback of `text`. Returns `None` for empty text (nothing
    /// to speak, caller proceeds as if playback ended instantly).
    pub fn speak(&mut self, text: &str, explicit_key: Option<&str>) -> Option<SpeakDispatch> {
        if text.is_empty() {
            return None;
        }
        self.generation += 1;
        let generation = self.generation;
        let key = cache::cache_key(&self.voice, &self.language, text, explicit_key);
        self.current = Some(CurrentClip {
            generation,
            key: key.clone(),
        });

        Some(match self.cache.lookup(&key) {
            Lookup::Hit(clip) => SpeakDispatch::Play { generation, clip },
            Lookup::InFlight => SpeakDispatch::Joined { generation, key },
            Lookup::Miss => {
                self.cache.begin_fetch(&key);
                SpeakDispatch::Fetch {
                    generation,
                    key,
                    text: text.to_string(),
                }
            }
        })
    }

    /// Route a finished fetch. Caches successful bytes regardless of
    /// staleness (a later replay reuses them), but only returns an outcome
    /// when the key still belongs to the latest `speak`.
    pub fn on_fetch_complete(
        &mut self,
        key: &str,
        result: Result<Vec<u8>, PlaybackError>,
    ) -> Option<FetchOutcome> {
        let outcome = match result {
            Ok(bytes) if bytes.is_empty() => {
                self.cache.fail(key);
                Err(PlaybackError::EmptyAudio)
            }
            Ok(bytes) => Ok(self.cache.complete(key, bytes)),
            Err(err) => {
                self.cache.fail(key);
                Err(err)
            }
        };

        let current = self.current.as_ref()?;
        if current.key != key {
            return None;
        }
        let generation = current.generation;
        Some(match outcome {
            Ok(clip) => FetchOutcome::Play { generation, clip },
            Err(error) => {
                self.current = None;
                FetchOutcome::Failed { generation, error }
            }
        })
    }

    /// The engine handed the clip to the sink. True only when the clip is
    /// still the latest one.
    pub fn on_playback_started(&self, generation: u64) -> bool {
        self.current.as_ref().map(|c| c.generation) == Some(generation)
    }

    /// Sink finished the clip. True only for the latest generation, so a
    /// superseded clip's completion is dropped here.
    pub fn on_clip_ended(&mut self, generation: u64) -> bool {
        if self.current.as_ref().map(|c| c.generation) == Some(generation) {
            self.current = None;
            true
        } else {
            false
        }
    }

    /// Sink failed mid-clip. Same staleness rule as `on_clip_ended`.
    pub fn on_clip_failed(&mut self, generation: u64) -> bool {
        self.on_clip_ended(generation)
    }

    /// Abandon whatever is current without issuing a replacement. Used on
    /// question change when nothing new is spoken.
    pub fn cancel(&mut self) {
        self.current = None;
    }

    pub fn cached_clips(&self) -> usize {
        self.cache.len()
    }
}
