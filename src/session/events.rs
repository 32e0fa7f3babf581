//! Messages crossing the engine boundary.
//!
//! [`UiEvent`] goes out to the embedding UI layer and [`EngineCommand`]
//! comes in from it; both are serde-tagged JSON-friendly shapes so a
//! bridge can shuttle them over any transport. [`EngineEvent`] is the
//! engine thread's private inbox: commands, worker completions, and
//! platform callbacks all arrive through it.

use super::flow::Phase;
use super::QuestionId;
use crate::api::{SessionPayload, UploadAck};
use crate::error::{ApiError, IntegrityDeliveryError, PlaybackError, SubmissionError, UploadError};
use crate::integrity::IntegritySnapshot;
use crate::recording::{MediaBlob, Response};
use serde::{Deserialize, Serialize};

/// Events emitted to the UI layer.
///
/// Serialized with an `"event"` tag for type discrimination.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiEvent {
    /// Session loaded; the interview can begin once consent is given.
    SessionReady {
        total_questions: usize,
        answered: usize,
        resume_index: usize,
    },

    PhaseChanged {
        phase: Phase,
    },

    QuestionChanged {
        index: usize,
        total: usize,
        question_id: QuestionId,
        text: String,
        question_type: String,
        answered: bool,
    },

    CountdownTick {
        seconds_left: u64,
    },

    SpeechStarted,

    SpeechEnded {
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    RecordingStarted {
        question_id: QuestionId,
    },

    /// Whole-second recording timer for the elapsed display.
    RecordingTick {
        seconds: u64,
    },

    /// Stage transition or whole-second silence progress, for the
    /// contextual prompts shown while the applicant is quiet.
    SilenceUpdate {
        stage: u8,
        silent_secs: u64,
    },

    UploadStarted {
        question_id: QuestionId,
    },

    UploadSucceeded {
        question_id: QuestionId,
        answered: usize,
        total: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },

    UploadFailed {
        message: String,
    },

    /// Shown once, after the first counted fullscreen exit.
    IntegrityWarning {
        message: String,
    },

    Message {
        text: String,
    },

    Error {
        message: String,
        recoverable: bool,
    },
}

/// Commands from the UI layer and platform bridge.
///
/// Deserialized with a `"cmd"` tag. Window/tab/fullscreen transitions are
/// forwarded by the embedder as they happen; the engine never observes the
/// platform directly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum EngineCommand {
    /// Applicant acknowledged recording consent; tracking and the
    /// countdown start here.
    Consent,
    StopRecording,
    /// Skip the current question; its recording is discarded.
    SkipQuestion,
    /// Applicant pressed "start answer" in the silence prompt; clears the
    /// accumulated silence.
    StartAnswer,
    ReplayQuestion,
    RetryUpload,
    Submit,
    FullscreenEntered,
    FullscreenExited,
    FocusLost,
    FocusRegained,
    TabHidden,
    TabVisible,
    /// Page teardown: persist the reload marker and flush telemetry over
    /// the best-effort path.
    PageHide,
    Shutdown,
}

/// Everything the engine thread can receive.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    Command(EngineCommand),
    SessionLoaded(Result<SessionPayload, ApiError>),
    SpeechFetched {
        key: String,
        result: Result<Vec<u8>, PlaybackError>,
    },
    ClipEnded {
        generation: u64,
    },
    ClipFailed {
        generation: u64,
        error: PlaybackError,
    },
    /// Recorder backend delivered the collected chunks.
    RecordingFinished {
        blob: MediaBlob,
    },
    UploadFinished {
        response: Response,
        result: Result<UploadAck, UploadError>,
    },
    SubmitFinished {
        result: Result<(), SubmissionError>,
    },
    CheckpointDelivered {
        snapshot: IntegritySnapshot,
        result: Result<(), IntegrityDeliveryError>,
    },
}
