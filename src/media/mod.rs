//! Camera/microphone acquisition and stream ownership.
//!
//! The engine never talks to platform media APIs directly. A [`MediaHost`]
//! implementation (browser bridge, OS capture layer, test fake) opens and
//! closes streams; [`DeviceManager`] owns the acquisition policy on top of
//! it: constraint fallback, error refinement, and device inventory refresh.

#[cfg(feature = "native-mic")]
pub mod mic;

use crate::error::DeviceError;

/// Which half of the capture pipeline a device or track belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// An enumerated capture device. Labels may be empty until the platform has
/// granted capture permission at least once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub kind: MediaKind,
}

/// One track inside an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub kind: MediaKind,
    pub device_id: String,
    pub enabled: bool,
    pub live: bool,
}

/// Handle to an open capture stream. The platform resource behind it is
/// released through [`MediaHost::close_stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: u64,
    pub tracks: Vec<TrackInfo>,
}

impl MediaStream {
    pub fn video_tracks(&self) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.iter().filter(|t| t.kind == MediaKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.iter().filter(|t| t.kind == MediaKind::Audio)
    }

    /// True when at least one audio track is enabled and live. A stream that
    /// fails this check is treated as silent by the engagement detector.
    pub fn audio_live(&self) -> bool {
        self.audio_tracks().any(|t| t.enabled && t.live)
    }
}

/// Requested devices for one acquisition. `None` asks for the platform
/// default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRequest {
    pub video_device: Option<String>,
    pub audio_device: Option<String>,
}

impl StreamRequest {
    pub fn defaults() -> Self {
        Self::default()
    }

    fn is_default(&self) -> bool {
        self.video_device.is_none() && self.audio_device.is_none()
    }
}

/// Platform collaborator that opens and closes capture streams.
pub trait MediaHost: Send {
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>, DeviceError>;
    fn open_stream(&mut self, request: &StreamRequest) -> Result<MediaStream, DeviceError>;
    /// Stop every track of the stream. Must tolerate unknown ids.
    fn close_stream(&mut self, stream_id: u64);
}

/// Owns the live stream for the session and the acquisition policy around
/// it: one automatic retry with default constraints when a pinned device has
/// gone away, plus a device-list refresh after every successful open
/// (labels only populate once permission is granted).
pub struct DeviceManager {
    host: Box<dyn MediaHost>,
    cameras: Vec<DeviceInfo>,
    microphones: Vec<DeviceInfo>,
    stream: Option<MediaStream>,
    /// Set when the last acquisition had to fall back to defaults, so the UI
    /// can tell the applicant their selected device was replaced.
    fell_back_to_defaults: bool,
}

impl DeviceManager {
    pub fn new(host: Box<dyn MediaHost>) -> Self {
        Self {
            host,
            cameras: Vec::new(),
            microphones: Vec::new(),
            stream: None,
            fell_back_to_defaults: false,
        }
    }

    pub fn cameras(&self) -> &[DeviceInfo] {
        &self.cameras
    }

    pub fn microphones(&self) -> &[DeviceInfo] {
        &self.microphones
    }

    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    pub fn fell_back_to_defaults(&self) -> bool {
        self.fell_back_to_defaults
    }

    /// Open a stream for the requested devices. Releases any previous stream
    /// first; two live streams would mean two recorders could attach.
    pub fn acquire(&mut self, request: StreamRequest) -> Result<&MediaStream, DeviceError> {
        self.release();
        self.fell_back_to_defaults = false;

        let outcome = match self.host.open_stream(&request) {
            Ok(stream) => Ok(stream),
            Err(err) if !request.is_default() && err.retryable_with_defaults() => {
                tracing::debug!("media_acquire_retry|error={err}");
                self.fell_back_to_defaults = true;
                self.host.open_stream(&StreamRequest::defaults())
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(stream) => {
                self.refresh_devices();
                tracing::debug!(
                    "media_acquired|stream_id={}|video={}|audio={}",
                    stream.id,
                    stream.video_tracks().count(),
                    stream.audio_tracks().count()
                );
                Ok(&*self.stream.insert(stream))
            }
            Err(err) => Err(self.refine_error(err)),
        }
    }

    /// Stop all tracks of the current stream. Safe to call repeatedly or
    /// with nothing acquired.
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.host.close_stream(stream.id);
        }
    }

    /// Re-enumerate after a permission grant so device labels fill in.
    pub fn refresh_devices(&mut self) {
        match self.host.enumerate_devices() {
            Ok(devices) => {
                self.cameras = devices
                    .iter()
                    .filter(|d| d.kind == MediaKind::Video)
                    .cloned()
                    .collect();
                self.microphones = devices
                    .into_iter()
                    .filter(|d| d.kind == MediaKind::Audio)
                    .collect();
            }
            Err(err) => tracing::debug!("media_enumerate_failed|error={err}"),
        }
    }

    /// Narrow a generic not-found into the modality that is actually absent,
    /// so the applicant is told which device to plug in.
    fn refine_error(&mut self, err: DeviceError) -> DeviceError {
        if err != DeviceError::NotFound {
            return err;
        }
        self.refresh_devices();
        match (self.cameras.is_empty(), self.microphones.is_empty()) {
            (true, false) => DeviceError::CameraMissing,
            (false, true) => DeviceError::MicrophoneMissing,
            _ => DeviceError::NotFound,
        }
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.release();
    }
}
