//! End-to-end engine scenarios against fake platform collaborators.
//!
//! The engine runs on the test thread via `pump`; worker threads and the
//! fake recorder/sink report back through the engine handle exactly like a
//! real embedding. Silence thresholds are scaled down so the auto-stop
//! scenario runs in milliseconds instead of twenty seconds.

use intervox::api::{
    InterviewApi, QuestionPayload, SessionPayload, UploadAck, UploadRequest, VideoResponseAck,
};
use intervox::audio::{AudioTap, LiveMeter};
use intervox::config::{EngineConfig, FlowConfig, SilenceConfig, TransportConfig};
use intervox::error::{
    ApiError, IntegrityDeliveryError, PlaybackError, SubmissionError, UploadError,
};
use intervox::integrity::{IntegritySnapshot, StateStore};
use intervox::media::{DeviceInfo, MediaHost, MediaKind, MediaStream, StreamRequest, TrackInfo};
use intervox::recording::{MediaBlob, RecorderBackend};
use intervox::speech::AudioSink;
use intervox::{EngineCommand, EngineDeps, EngineHandle, Phase, SessionEngine, UiEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ----------------------------------------------------------------------------
// Fakes
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ApiState {
    uploads: Vec<(u64, String)>,
    fail_uploads: usize,
    submits: usize,
    checkpoints: Vec<IntegritySnapshot>,
    beacon_available: bool,
}

#[derive(Clone)]
struct FakeApi {
    questions: usize,
    answered: Vec<u64>,
    state: Arc<Mutex<ApiState>>,
}

impl FakeApi {
    fn new(questions: usize) -> Self {
        Self {
            questions,
            answered: Vec::new(),
            state: Arc::new(Mutex::new(ApiState::default())),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ApiState> {
        self.state.lock().unwrap()
    }
}

impl InterviewApi for FakeApi {
    fn fetch_session(&self) -> Result<SessionPayload, ApiError> {
        Ok(SessionPayload {
            public_id: "iv-e2e".into(),
            status: None,
            questions: (1..=self.questions as u64)
                .map(|id| QuestionPayload {
                    id,
                    question_text: format!("Question {id}?"),
                    question_type: "behavioral".into(),
                })
                .collect(),
            answered_question_ids: self.answered.clone(),
            current_question_index: None,
        })
    }

    fn upload_response(&self, request: &UploadRequest) -> Result<UploadAck, UploadError> {
        let mut state = self.state();
        if state.fail_uploads > 0 {
            state.fail_uploads -= 1;
            return Err(UploadError::Network("connection reset".into()));
        }
        state
            .uploads
            .push((request.question_id, request.duration.clone()));
        Ok(UploadAck {
            video_response: Some(VideoResponseAck {
                transcript: Some("answer text".into()),
            }),
            transcription_error: None,
        })
    }

    fn submit(&self, _snapshot: &IntegritySnapshot) -> Result<(), SubmissionError> {
        self.state().submits += 1;
        Ok(())
    }

    fn post_checkpoint(&self, snapshot: &IntegritySnapshot) -> Result<(), IntegrityDeliveryError> {
        self.state().checkpoints.push(snapshot.clone());
        Ok(())
    }

    fn post_checkpoint_beacon(
        &self,
        snapshot: &IntegritySnapshot,
    ) -> Result<(), IntegrityDeliveryError> {
        let mut state = self.state();
        if state.beacon_available {
            state.checkpoints.push(snapshot.clone());
            Ok(())
        } else {
            Err(IntegrityDeliveryError::BeaconUnavailable)
        }
    }

    fn synthesize(&self, text: &str) -> Result<Vec<u8>, PlaybackError> {
        Ok(text.as_bytes().to_vec())
    }
}

struct FakeHost;

impl MediaHost for FakeHost {
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>, intervox::error::DeviceError> {
        Ok(vec![
            DeviceInfo {
                id: "cam".into(),
                label: "Camera".into(),
                kind: MediaKind::Video,
            },
            DeviceInfo {
                id: "mic".into(),
                label: "Microphone".into(),
                kind: MediaKind::Audio,
            },
        ])
    }

    fn open_stream(
        &mut self,
        _request: &StreamRequest,
    ) -> Result<MediaStream, intervox::error::DeviceError> {
        let track = |kind| TrackInfo {
            kind,
            device_id: "default".into(),
            enabled: true,
            live: true,
        };
        Ok(MediaStream {
            id: 1,
            tracks: vec![track(MediaKind::Video), track(MediaKind::Audio)],
        })
    }

    fn close_stream(&mut self, _stream_id: u64) {}
}

type SharedHandle = Arc<Mutex<Option<EngineHandle>>>;

/// Delivers one chunk blob as soon as a stop is requested, the way a real
/// recorder flushes on stop.
struct FakeRecorder {
    handle: SharedHandle,
    starts: Arc<AtomicUsize>,
}

impl RecorderBackend for FakeRecorder {
    fn start(&mut self, _stream: &MediaStream) -> Result<(), intervox::error::DeviceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn request_stop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().as_ref() {
            handle.recording_finished(MediaBlob::webm(vec![0xCC; 32]));
        }
    }
}

/// Completes every clip instantly.
struct FakeSink {
    handle: SharedHandle,
    played: Arc<Mutex<Vec<u64>>>,
}

impl AudioSink for FakeSink {
    fn play(&mut self, generation: u64, _clip: Arc<[u8]>) -> Result<(), PlaybackError> {
        self.played.lock().unwrap().push(generation);
        if let Some(handle) = self.handle.lock().unwrap().as_ref() {
            handle.clip_ended(generation);
        }
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Always-silent microphone window.
struct SilentTap;

impl AudioTap for SilentTap {
    fn mic_live(&self) -> bool {
        true
    }
    fn window(&mut self) -> Option<Vec<f32>> {
        Some(vec![0.0; 256])
    }
}

#[derive(Default)]
struct MapStore(HashMap<String, String>);

impl StateStore for MapStore {
    fn read(&mut self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
    fn write(&mut self, key: &str, value: &str) {
        self.0.insert(key.into(), value.into());
    }
    fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

fn fast_config() -> EngineConfig {
    EngineConfig {
        silence: SilenceConfig {
            sample_interval_ms: 5,
            gentle_ms: 50,
            supportive_ms: 100,
            options_ms: 150,
            auto_stop_ms: 200,
            ..SilenceConfig::default()
        },
        flow: FlowConfig {
            countdown_secs: 0,
            record_start_delay_ms: 1,
            auto_submit_grace_ms: 20,
        },
        transport: TransportConfig {
            checkpoint_interval_ms: 3_600_000,
            ..TransportConfig::default()
        },
        ..EngineConfig::default()
    }
}

struct Harness {
    engine: SessionEngine,
    handle: EngineHandle,
    ui: crossbeam_channel::Receiver<UiEvent>,
    events: Vec<UiEvent>,
    api: FakeApi,
    recorder_starts: Arc<AtomicUsize>,
    played: Arc<Mutex<Vec<u64>>>,
}

impl Harness {
    fn new(api: FakeApi, tap: Option<Box<dyn AudioTap>>) -> Self {
        let shared: SharedHandle = Arc::new(Mutex::new(None));
        let recorder_starts = Arc::new(AtomicUsize::new(0));
        let played = Arc::new(Mutex::new(Vec::new()));
        let deps = EngineDeps {
            api: Arc::new(api.clone()),
            media_host: Box::new(FakeHost),
            recorder: Box::new(FakeRecorder {
                handle: shared.clone(),
                starts: recorder_starts.clone(),
            }),
            sink: Box::new(FakeSink {
                handle: shared.clone(),
                played: played.clone(),
            }),
            tap,
            store: Box::new(MapStore::default()),
            meter: LiveMeter::new(),
        };
        let (engine, handle, ui) = SessionEngine::new(fast_config(), deps).unwrap();
        *shared.lock().unwrap() = Some(handle.clone());
        Self {
            engine,
            handle,
            ui,
            events: Vec::new(),
            api,
            recorder_starts,
            played,
        }
    }

    /// Pump until an event matching `pred` arrives. Panics after a bounded
    /// number of loops so a wedged engine fails fast.
    fn pump_until(&mut self, what: &str, pred: impl Fn(&UiEvent) -> bool) {
        for _ in 0..2_000 {
            self.engine.pump(1);
            while let Ok(event) = self.ui.try_recv() {
                let matched = pred(&event);
                self.events.push(event);
                if matched {
                    return;
                }
            }
        }
        panic!("never observed: {what}; seen {:#?}", self.events);
    }

    /// Pump until `cond` holds, independent of the event stream.
    fn wait_until(&mut self, what: &str, cond: impl Fn() -> bool) {
        for _ in 0..2_000 {
            self.engine.pump(1);
            while let Ok(event) = self.ui.try_recv() {
                self.events.push(event);
            }
            if cond() {
                return;
            }
        }
        panic!("never reached: {what}; seen {:#?}", self.events);
    }

    fn saw(&self, pred: impl Fn(&UiEvent) -> bool) -> bool {
        self.events.iter().any(|e| pred(e))
    }
}

fn recording_started_for(id: u64) -> impl Fn(&UiEvent) -> bool {
    move |e| matches!(e, UiEvent::RecordingStarted { question_id } if *question_id == id)
}

// ----------------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------------

#[test]
fn silent_question_auto_stops_and_the_interview_completes() {
    // Three questions; the applicant stops Q1 and Q3 manually and says
    // nothing at all during Q2.
    let mut h = Harness::new(FakeApi::new(3), Some(Box::new(SilentTap)));

    h.pump_until("consent prompt", |e| {
        matches!(
            e,
            UiEvent::PhaseChanged {
                phase: Phase::AwaitingConsent
            }
        )
    });
    h.handle.command(EngineCommand::Consent);

    h.pump_until("recording of q1", recording_started_for(1));
    h.handle.command(EngineCommand::StopRecording);

    // Q2 runs on silence alone: no user input until the recorder for Q3
    // starts. Stage 4 must stop and advance by itself.
    h.pump_until("recording of q2", recording_started_for(2));
    h.pump_until("recording of q3", recording_started_for(3));
    assert!(h.saw(
        |e| matches!(e, UiEvent::Message { text } if text.contains("No response recorded"))
    ));

    h.handle.command(EngineCommand::StopRecording);
    h.pump_until("session done", |e| {
        matches!(e, UiEvent::PhaseChanged { phase: Phase::Done })
    });

    let state = h.api.state();
    let uploaded: Vec<u64> = state.uploads.iter().map(|(id, _)| *id).collect();
    assert_eq!(uploaded, vec![1, 2, 3]);
    // Zero-length answers still upload with the clamped minimum duration.
    assert!(state.uploads.iter().all(|(_, d)| d != "00:00:00"));
    assert_eq!(state.submits, 1, "auto-submit fires exactly once");
    assert_eq!(h.recorder_starts.load(Ordering::SeqCst), 3);
}

#[test]
fn upload_failure_is_retried_without_rerecording() {
    let api = FakeApi::new(1);
    api.state().fail_uploads = 1;
    let mut h = Harness::new(api, Some(Box::new(SilentTap)));

    h.pump_until("consent prompt", |e| {
        matches!(
            e,
            UiEvent::PhaseChanged {
                phase: Phase::AwaitingConsent
            }
        )
    });
    h.handle.command(EngineCommand::Consent);
    h.pump_until("recording of q1", recording_started_for(1));
    h.handle.command(EngineCommand::StopRecording);

    h.pump_until("upload failure", |e| matches!(e, UiEvent::UploadFailed { .. }));
    h.handle.command(EngineCommand::RetryUpload);

    h.pump_until("session done", |e| {
        matches!(e, UiEvent::PhaseChanged { phase: Phase::Done })
    });
    assert_eq!(h.api.state().uploads.len(), 1);
    // One recording served both attempts.
    assert_eq!(h.recorder_starts.load(Ordering::SeqCst), 1);
}

#[test]
fn fullscreen_exits_warn_once_and_checkpoint_counts() {
    let mut h = Harness::new(FakeApi::new(1), None);

    h.pump_until("consent prompt", |e| {
        matches!(
            e,
            UiEvent::PhaseChanged {
                phase: Phase::AwaitingConsent
            }
        )
    });
    h.handle.command(EngineCommand::Consent);
    h.pump_until("speech", |e| matches!(e, UiEvent::SpeechStarted));

    h.handle.command(EngineCommand::FullscreenEntered);
    h.handle.command(EngineCommand::FullscreenExited);
    h.pump_until("first exit warning", |e| {
        matches!(e, UiEvent::IntegrityWarning { .. })
    });

    h.handle.command(EngineCommand::FullscreenEntered);
    h.handle.command(EngineCommand::FullscreenExited);
    let api = h.api.clone();
    h.wait_until("checkpoint with both exits", move || {
        api.state()
            .checkpoints
            .iter()
            .any(|s| s.fullscreen_exit_count == 2)
    });

    let warnings = h
        .events
        .iter()
        .filter(|e| matches!(e, UiEvent::IntegrityWarning { .. }))
        .count();
    assert_eq!(warnings, 1, "banner only after the first exit");
}

#[test]
fn page_teardown_prefers_the_beacon_and_deduplicates() {
    let api = FakeApi::new(1);
    api.state().beacon_available = true;
    let mut h = Harness::new(api, None);

    h.pump_until("consent prompt", |e| {
        matches!(
            e,
            UiEvent::PhaseChanged {
                phase: Phase::AwaitingConsent
            }
        )
    });
    h.handle.command(EngineCommand::Consent);
    h.pump_until("speech", |e| matches!(e, UiEvent::SpeechStarted));

    h.handle.command(EngineCommand::FocusLost);
    h.handle.command(EngineCommand::PageHide);
    // A second teardown moments later with identical totals is suppressed.
    h.handle.command(EngineCommand::PageHide);
    h.handle.command(EngineCommand::Shutdown);
    h.engine.pump(50);

    let state = h.api.state();
    assert_eq!(
        state.checkpoints.len(),
        1,
        "identical snapshots produce one delivery: {:#?}",
        state.checkpoints
    );
    assert_eq!(state.checkpoints[0].focus_lost_count, 1);
}

#[test]
fn all_answered_resume_submits_on_request() {
    let mut api = FakeApi::new(2);
    api.answered = vec![1, 2];
    let mut h = Harness::new(api, None);

    h.pump_until("completion notice", |e| {
        matches!(e, UiEvent::Message { text } if text.contains("All questions have been answered"))
    });
    h.handle.command(EngineCommand::Consent);
    h.pump_until("parked for submission", |e| {
        matches!(
            e,
            UiEvent::PhaseChanged {
                phase: Phase::AwaitingSubmit
            }
        )
    });

    h.handle.command(EngineCommand::Submit);
    h.pump_until("session done", |e| {
        matches!(e, UiEvent::PhaseChanged { phase: Phase::Done })
    });
    assert_eq!(h.api.state().submits, 1);
    assert!(h.api.state().uploads.is_empty());
}

#[test]
fn replay_supersedes_the_previous_clip() {
    let mut h = Harness::new(FakeApi::new(2), Some(Box::new(SilentTap)));

    h.pump_until("consent prompt", |e| {
        matches!(
            e,
            UiEvent::PhaseChanged {
                phase: Phase::AwaitingConsent
            }
        )
    });
    h.handle.command(EngineCommand::Consent);
    h.pump_until("first speech", |e| matches!(e, UiEvent::SpeechStarted));

    h.handle.command(EngineCommand::ReplayQuestion);
    h.pump_until("replayed speech", |e| matches!(e, UiEvent::SpeechStarted));

    // Generations are strictly increasing; the replay is a new clip, and
    // the cached bytes mean no second synthesis round-trip is needed.
    let played = h.played.lock().unwrap().clone();
    assert!(played.len() >= 2);
    assert!(played.windows(2).all(|w| w[0] < w[1]));
}
