//! Server contract for the interview session.
//!
//! The engine consumes five operations through [`InterviewApi`]; transport
//! and auth live behind the trait. [`http::HttpInterviewApi`] is the stock
//! blocking implementation with the production endpoint shapes; tests and
//! exotic embedders provide their own.

pub mod http;

use crate::error::{ApiError, IntegrityDeliveryError, PlaybackError, SubmissionError, UploadError};
use crate::integrity::IntegritySnapshot;
use crate::recording::MediaBlob;
use crate::session::QuestionId;
use serde::Deserialize;

/// Session document returned by the server on load.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionPayload {
    pub public_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub questions: Vec<QuestionPayload>,
    /// Authoritative over any local assumption about progress.
    #[serde(default)]
    pub answered_question_ids: Vec<QuestionId>,
    #[serde(default)]
    pub current_question_index: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionPayload {
    pub id: QuestionId,
    pub question_text: String,
    #[serde(default)]
    pub question_type: String,
}

/// One response upload. The duration travels as `00:MM:SS`, the format the
/// server-side validator expects.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub question_id: QuestionId,
    pub file_name: String,
    pub blob: MediaBlob,
    pub duration: String,
}

impl UploadRequest {
    pub fn new(question_id: QuestionId, blob: MediaBlob, duration_secs: u64) -> Self {
        Self {
            question_id,
            file_name: format!("question_{question_id}.webm"),
            blob,
            duration: format_duration(duration_secs),
        }
    }
}

/// Upload acknowledgment. The transcript is informational; its absence is
/// logged and never blocks advancement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadAck {
    #[serde(default)]
    pub video_response: Option<VideoResponseAck>,
    #[serde(default)]
    pub transcription_error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoResponseAck {
    #[serde(default)]
    pub transcript: Option<String>,
}

impl UploadAck {
    pub fn transcript(&self) -> Option<&str> {
        self.video_response
            .as_ref()
            .and_then(|vr| vr.transcript.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

/// The five server operations the engine needs. Implementations must be
/// callable from worker threads.
pub trait InterviewApi: Send + Sync {
    fn fetch_session(&self) -> Result<SessionPayload, ApiError>;

    fn upload_response(&self, request: &UploadRequest) -> Result<UploadAck, UploadError>;

    fn submit(&self, snapshot: &IntegritySnapshot) -> Result<(), SubmissionError>;

    fn post_checkpoint(&self, snapshot: &IntegritySnapshot) -> Result<(), IntegrityDeliveryError>;

    /// Fire-and-forget checkpoint for page teardown. Must return without
    /// waiting for the server; `BeaconUnavailable` tells the caller to fall
    /// back to [`InterviewApi::post_checkpoint`].
    fn post_checkpoint_beacon(
        &self,
        snapshot: &IntegritySnapshot,
    ) -> Result<(), IntegrityDeliveryError>;

    fn synthesize(&self, text: &str) -> Result<Vec<u8>, PlaybackError>;
}

/// `00:MM:SS`, minutes allowed past 59. The server parses this shape only.
pub fn format_duration(secs: u64) -> String {
    format!("00:{:02}:{:02}", secs / 60, secs % 60)
}
