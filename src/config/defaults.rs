//! Default policy constants for the session engine.
//!
//! The silence thresholds, grace delays, and timeouts are product policy,
//! not invariants: any values keep the engine correct as long as the stage
//! thresholds stay strictly ordered (gentle < supportive < options <
//! auto-stop). Validation enforces that ordering.

/// RMS energy on a [0, 1] scale at or above which a sample counts as speech.
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.02;

/// Cadence of the silence sampling loop while a recording is active.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 16;

/// Continuous silence before the first, gentle prompt.
pub const DEFAULT_STAGE_GENTLE_MS: u64 = 5_000;

/// Continuous silence before the supportive prompt.
pub const DEFAULT_STAGE_SUPPORTIVE_MS: u64 = 8_000;

/// Continuous silence before the options prompt (start / repeat / skip).
pub const DEFAULT_STAGE_OPTIONS_MS: u64 = 12_000;

/// Continuous silence before the recording is stopped automatically.
pub const DEFAULT_STAGE_AUTO_STOP_MS: u64 = 20_000;

/// Initial get-ready countdown before the first question is spoken.
pub const DEFAULT_COUNTDOWN_SECS: u64 = 5;

/// Pause between the end of question playback and recording start.
pub const DEFAULT_RECORD_START_DELAY_MS: u64 = 1_000;

/// Grace delay between the final upload succeeding and auto-submission, so
/// in-flight UI messaging can render.
pub const DEFAULT_AUTO_SUBMIT_GRACE_MS: u64 = 3_000;

/// Upload timeout. Extended because response payloads are whole video clips.
pub const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 120_000;

/// Speech synthesis fetch timeout. Short: a timed-out fetch degrades to a
/// silent auto-advance instead of blocking the interview.
pub const DEFAULT_SPEECH_TIMEOUT_MS: u64 = 20_000;

/// Timeout for session load, submit, and checkpoint requests.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Opportunistic integrity checkpoint cadence. Deduplication suppresses the
/// network call whenever nothing changed.
pub const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 30_000;

/// Synthesized voice identifier sent to the speech service.
pub const DEFAULT_VOICE_ID: &str = "thalia";

/// Synthesized voice language tag.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Bounds accepted for the sampling cadence, matching what the audio
/// pipeline can service per tick.
pub const MIN_SAMPLE_INTERVAL_MS: u64 = 5;
pub const MAX_SAMPLE_INTERVAL_MS: u64 = 120;
