//! Error types for the interview session engine.
//!
//! Each failure family maps to a distinct recovery policy: device errors are
//! retried through the selector UI, playback errors fall through to
//! recording, upload errors keep the response for retry, and integrity
//! delivery errors are logged and swallowed.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Umbrella error for callers that do not care which family failed.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    IntegrityDelivery(#[from] IntegrityDeliveryError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Camera/microphone acquisition failures. Messages are shown to the
/// applicant verbatim, so they name the device and the fix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Permission denied. Please allow camera and microphone access.")]
    PermissionDenied,

    #[error("No camera detected. Plug in or enable a camera, then try again.")]
    CameraMissing,

    #[error("No microphone detected. Plug in or enable a microphone, then try again.")]
    MicrophoneMissing,

    #[error("Camera or microphone not detected. Please check your devices and try again.")]
    NotFound,

    #[error("Selected device unavailable.")]
    ConstraintUnsatisfiable,

    #[error("Could not access camera or microphone: {0}")]
    Unknown(String),
}

impl DeviceError {
    /// Errors worth one automatic retry with default constraints when the
    /// original request pinned a specific device.
    pub fn retryable_with_defaults(&self) -> bool {
        matches!(
            self,
            DeviceError::NotFound
                | DeviceError::ConstraintUnsatisfiable
                | DeviceError::CameraMissing
                | DeviceError::MicrophoneMissing
        )
    }
}

/// Speech fetch or playback failures. Cloneable so a single failed fetch can
/// be fanned out to every caller waiting on the same cache key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("speech synthesis request failed: {0}")]
    Fetch(String),

    #[error("speech synthesis timed out")]
    Timeout,

    #[error("synthesized audio was empty")]
    EmptyAudio,

    #[error("audio output failed: {0}")]
    Sink(String),
}

/// Response upload failures. The recording stays with the controller so a
/// retry never requires re-recording.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Upload failed: The interview session was not found on the server.")]
    SessionGone,

    #[error("Upload failed: {0}")]
    Rejected(String),

    #[error("Upload failed: {0}")]
    Network(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("Failed to submit interview: {0}")]
    Rejected(String),

    #[error("Failed to submit interview. Please try again.")]
    Network(String),
}

/// Checkpoint delivery failures. Never surfaced to the applicant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityDeliveryError {
    /// The fire-and-forget transport is not available on this platform;
    /// callers fall back to the standard request.
    #[error("beacon transport unavailable")]
    BeaconUnavailable,

    #[error("checkpoint delivery failed: {0}")]
    Network(String),
}

/// Session load failures. `NotFound` and `NoQuestions` are terminal for the
/// session; everything else may be retried by reloading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Interview not found or no longer available.")]
    NotFound,

    #[error("This interview has expired.")]
    Expired,

    #[error("Interview questions are not available.")]
    NoQuestions,

    #[error("Failed to load interview: {0}")]
    Network(String),

    #[error("Failed to load interview: unexpected response ({0})")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_retry_classification() {
        assert!(DeviceError::NotFound.retryable_with_defaults());
        assert!(DeviceError::ConstraintUnsatisfiable.retryable_with_defaults());
        assert!(!DeviceError::PermissionDenied.retryable_with_defaults());
        assert!(!DeviceError::Unknown("boom".into()).retryable_with_defaults());
    }

    #[test]
    fn messages_name_the_missing_device() {
        assert!(DeviceError::CameraMissing.to_string().contains("camera"));
        assert!(DeviceError::MicrophoneMissing
            .to_string()
            .contains("microphone"));
    }
}
