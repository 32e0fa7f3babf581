//! Record/stop/upload lifecycle for the active question.
//!
//! The controller is the only component allowed to run a recorder against
//! the session stream, and it enforces the one invariant everything else
//! leans on: at most one response is ever recording or uploading. Platform
//! capture is behind [`RecorderBackend`]; the controller owns the state
//! machine and the skip/upload decision when chunks arrive.


use crate::error::DeviceError;
use crate::media::MediaStream;
use crate::session::QuestionId;
use thiserror::Error;

/// Captured media for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl MediaBlob {
    pub fn webm(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime: "video/webm".to_string(),
        }
    }
}

/// One recorded answer, owned by the controller until its upload succeeds
/// (or the question was skipped). Kept across upload failures so a retry
/// never requires re-recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub question_id: QuestionId,
    pub blob: MediaBlob,
    pub duration_secs: u64,
}

/// Platform collaborator that captures the stream. `request_stop` must
/// eventually deliver collected chunks back to the engine; the controller
/// only tracks lifecycle state.
pub trait RecorderBackend: Send {
    fn start(&mut self, stream: &MediaStream) -> Result<(), DeviceError>;
    fn request_stop(&mut self);
}

/// Why `start` was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    /// A response is already recording or uploading.
    #[error("A recording is already in progress.")]
    AlreadyActive,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    Idle,
    Recording,
    Uploading,
}

/// What to do with the chunks the backend delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Question was explicitly skipped; the response is discarded and the
    /// orchestrator advances without an upload.
    Skipped { question_id: QuestionId },
    /// Upload this response. Duration is already clamped to at least one
    /// second; the server rejects zero-duration artifacts as invalid.
    Upload(Response),
}

enum ControllerState {
    Idle,
    Recording { question_id: QuestionId, skip: bool },
    /// Stop requested; waiting for the backend to deliver chunks.
    Draining { question_id: QuestionId, skip: bool },
    Uploading { question_id: QuestionId },
}

pub struct RecordingController {
    state: ControllerState,
    /// Response from a failed upload, parked for a caller-driven retry.
    retained: Option<Response>,
}

impl Default for RecordingController {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingController {
    pub fn new() -> Self {
        Self {
            state: ControllerState::Idle,
            retained: None,
        }
    }

    pub fn phase(&self) -> RecorderPhase {
        match self.state {
            ControllerState::Idle => RecorderPhase::Idle,
            ControllerState::Recording { .. } | ControllerState::Draining { .. } => {
                RecorderPhase::Recording
            }
            ControllerState::Uploading { .. } => RecorderPhase::Uploading,
        }
    }

    pub fn active_question(&self) -> Option<QuestionId> {
        match self.state {
            ControllerState::Idle => None,
            ControllerState::Recording { question_id, .. }
            | ControllerState::Draining { question_id, .. }
            | ControllerState::Uploading { question_id } => Some(question_id),
        }
    }

    pub fn retained_response(&self) -> Option<&Response> {
        self.retained.as_ref()
    }

    /// Begin recording `question_id` against the live stream. Requires both
    /// modalities: recording video without audio (or the reverse) produces
    /// an artifact the reviewers cannot use, so it fails fast instead.
    pub fn start(
        &mut self,
        question_id: QuestionId,
        stream: &MediaStream,
    ) -> Result<(), StartError> {
        if !matches!(self.state, ControllerState::Idle) {
            return Err(StartError::AlreadyActive);
        }
        if stream.audio_tracks().count() == 0 {
            return Err(DeviceError::MicrophoneMissing.into());
        }
        if stream.video_tracks().count() == 0 {
            return Err(DeviceError::CameraMissing.into());
        }
        self.state = ControllerState::Recording {
            question_id,
            skip: false,
        };
        tracing::debug!("recording_start|question_id={question_id}");
        Ok(())
    }

    /// Roll back a recording that never actually started because the
    /// backend refused. No chunks will arrive for it.
    pub fn abort(&mut self) {
        if matches!(
            self.state,
            ControllerState::Recording { .. } | ControllerState::Draining { .. }
        ) {
            self.state = ControllerState::Idle;
        }
    }

    /// Ask the backend to stop. Idempotent: repeated calls while draining
    /// (or calls with nothing recording) return false and change nothing.
    pub fn request_stop(&mut self) -> bool {
        match self.state {
            ControllerState::Recording { question_id, skip } => {
                self.state = ControllerState::Draining { question_id, skip };
                true
            }
            _ => false,
        }
    }

    /// Flag the in-progress recording as skipped; its chunks will be
    /// discarded instead of uploaded.
    pub fn mark_skip(&mut self) {
        match &mut self.state {
            ControllerState::Recording { skip, .. } | ControllerState::Draining { skip, .. } => {
                *skip = true;
            }
            _ => {}
        }
    }

    /// The backend delivered the collected chunks. `duration_secs` is the
    /// wall-clock recording time measured by the engine.
    pub fn on_chunks_ready(&mut self, blob: MediaBlob, duration_secs: u64) -> Option<StopOutcome> {
        let (question_id, skip) = match self.state {
            ControllerState::Recording { question_id, skip }
            | ControllerState::Draining { question_id, skip } => (question_id, skip),
            _ => return None,
        };
        if skip {
            self.state = ControllerState::Idle;
            tracing::debug!("recording_skipped|question_id={question_id}");
            return Some(StopOutcome::Skipped { question_id });
        }
        self.state = ControllerState::Uploading { question_id };
        let response = Response {
            question_id,
            blob,
            duration_secs: duration_secs.max(1),
        };
        tracing::debug!(
            "recording_complete|question_id={question_id}|duration_s={}|bytes={}",
            response.duration_secs,
            response.blob.bytes.len()
        );
        Some(StopOutcome::Upload(response))
    }

    /// Upload acknowledged; the response is gone for good.
    pub fn on_upload_success(&mut self) -> Option<QuestionId> {
        match self.state {
            ControllerState::Uploading { question_id } => {
                self.state = ControllerState::Idle;
                self.retained = None;
                Some(question_id)
            }
            _ => None,
        }
    }

    /// Upload failed; park the response so the applicant can retry without
    /// re-recording.
    pub fn on_upload_failure(&mut self, response: Response) {
        if matches!(self.state, ControllerState::Uploading { .. }) {
            self.state = ControllerState::Idle;
        }
        self.retained = Some(response);
    }

    /// Take the parked response and re-enter the uploading state.
    pub fn begin_retry(&mut self) -> Option<Response> {
        if !matches!(self.state, ControllerState::Idle) {
            return None;
        }
        let response = self.retained.take()?;
        self.state = ControllerState::Uploading {
            question_id: response.question_id,
        };
        Some(response)
    }
}
