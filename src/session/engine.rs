//! The engine thread: one loop that owns every component.
//!
//! All state lives on the thread that calls [`SessionEngine::run`]. The
//! loop drains an event channel with a sampling-interval timeout, so each
//! pass handles at most one event and then advances the timers, the
//! silence detector, and the checkpoint cadence. Blocking I/O (session
//! load, speech fetches, uploads, submission, checkpoints) runs on
//! short-lived worker threads that report completions back through the
//! same channel.

use super::events::{EngineCommand, EngineEvent, UiEvent};
use super::flow::{FlowAction, SessionFlow};
use super::{QuestionId, Session};
use crate::api::{InterviewApi, UploadRequest};
use crate::audio::{classify_window, AudioTap, LiveMeter, SampleClass, SilenceTracker};
use crate::config::EngineConfig;
use crate::error::{EngineError, IntegrityDeliveryError, PlaybackError};
use crate::integrity::{IntegrityMonitor, IntegritySnapshot, StateStore};
use crate::media::{DeviceManager, MediaHost, StreamRequest};
use crate::recording::{
    MediaBlob, RecorderBackend, RecorderPhase, RecordingController, Response, StartError,
    StopOutcome,
};
use crate::session::flow::Phase;
use crate::speech::{AudioSink, FetchOutcome, SpeakDispatch, SpeechService};
use crate::telemetry;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Cloneable sender for everything that needs to reach the engine thread:
/// the UI bridge, the recorder backend, and the audio sink.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<EngineEvent>,
}

impl EngineHandle {
    pub fn command(&self, command: EngineCommand) {
        self.send(EngineEvent::Command(command));
    }

    /// Called by the recorder backend once its chunks are collected.
    pub fn recording_finished(&self, blob: MediaBlob) {
        self.send(EngineEvent::RecordingFinished { blob });
    }

    /// Called by the audio sink when a clip finishes.
    pub fn clip_ended(&self, generation: u64) {
        self.send(EngineEvent::ClipEnded { generation });
    }

    /// Called by the audio sink when playback breaks mid-clip.
    pub fn clip_failed(&self, generation: u64, error: PlaybackError) {
        self.send(EngineEvent::ClipFailed { generation, error });
    }

    pub(crate) fn send(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Platform collaborators the embedder supplies.
pub struct EngineDeps {
    pub api: Arc<dyn InterviewApi>,
    pub media_host: Box<dyn MediaHost>,
    pub recorder: Box<dyn RecorderBackend>,
    pub sink: Box<dyn AudioSink>,
    /// Audio analysis for the silence detector. `None` means the platform
    /// has no analysis capability; the detector then treats the applicant
    /// as always speaking rather than failing the session.
    pub tap: Option<Box<dyn AudioTap>>,
    pub store: Box<dyn StateStore>,
    /// Live mic level shared with the UI; the native tap writes into it.
    pub meter: LiveMeter,
}

pub struct SessionEngine {
    config: EngineConfig,
    api: Arc<dyn InterviewApi>,
    devices: DeviceManager,
    recorder: Box<dyn RecorderBackend>,
    sink: Box<dyn AudioSink>,
    tap: Option<Box<dyn AudioTap>>,
    store: Box<dyn StateStore>,
    meter: LiveMeter,

    speech: SpeechService,
    controller: RecordingController,
    integrity: IntegrityMonitor,
    tracker: SilenceTracker,
    flow: Option<SessionFlow>,

    events: Receiver<EngineEvent>,
    handle: EngineHandle,
    ui_tx: Sender<UiEvent>,

    started: bool,
    load_failed: bool,
    last_tick: Instant,
    active_question: Option<QuestionId>,
    recording_ms: u64,
    recording_last_sec: u64,
    silence_last_sec: u64,
    stage_peak: u8,
    checkpoint_elapsed_ms: u64,
    checkpoint_in_flight: bool,
}

impl SessionEngine {
    /// Build the engine. Returns the handle the platform bridge feeds and
    /// the receiver the UI drains.
    pub fn new(
        config: EngineConfig,
        deps: EngineDeps,
    ) -> Result<(Self, EngineHandle, Receiver<UiEvent>), EngineError> {
        config.validate()?;
        telemetry::init_tracing(&config.logging);

        let (tx, events) = unbounded();
        let (ui_tx, ui_rx) = unbounded();
        let handle = EngineHandle { tx };

        let engine = Self {
            speech: SpeechService::new(&config.voice),
            tracker: SilenceTracker::new((&config.silence).into()),
            config,
            api: deps.api,
            devices: DeviceManager::new(deps.media_host),
            recorder: deps.recorder,
            sink: deps.sink,
            tap: deps.tap,
            store: deps.store,
            meter: deps.meter,
            controller: RecordingController::new(),
            integrity: IntegrityMonitor::new(),
            flow: None,
            events,
            handle: handle.clone(),
            ui_tx,
            started: false,
            load_failed: false,
            last_tick: Instant::now(),
            active_question: None,
            recording_ms: 0,
            recording_last_sec: 0,
            silence_last_sec: 0,
            stage_peak: 0,
            checkpoint_elapsed_ms: 0,
            checkpoint_in_flight: false,
        };
        Ok((engine, handle, ui_rx))
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn phase(&self) -> Phase {
        if self.load_failed {
            return Phase::Failed;
        }
        self.flow
            .as_ref()
            .map(|flow| flow.phase())
            .unwrap_or(Phase::Loading)
    }

    pub fn session(&self) -> Option<&Session> {
        self.flow.as_ref().map(|flow| flow.session())
    }

    /// Live microphone level for the UI meter.
    pub fn audio_level_db(&self) -> f32 {
        self.meter.level_db()
    }

    pub fn silence_stage(&self) -> u8 {
        self.tracker.stage().index()
    }

    /// Run until shutdown. Blocks the calling thread; embedders with their
    /// own loop can call [`SessionEngine::pump`] instead.
    pub fn run(&mut self) {
        self.start();
        loop {
            if !self.pump_once() {
                break;
            }
        }
    }

    /// Drive up to `max_loops` passes of the event loop.
    pub fn pump(&mut self, max_loops: u64) {
        self.start();
        for _ in 0..max_loops {
            if !self.pump_once() {
                break;
            }
        }
    }

    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.last_tick = Instant::now();
        self.integrity.on_load(self.store.as_mut());
        self.emit(UiEvent::PhaseChanged {
            phase: Phase::Loading,
        });
        spawn_session_load(self.api.clone(), self.handle.clone());
    }

    fn pump_once(&mut self) -> bool {
        let tick = Duration::from_millis(self.config.silence.sample_interval_ms);
        match self.events.recv_timeout(tick) {
            Ok(event) => {
                if !self.handle_event(event) {
                    return false;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return false,
        }
        self.on_tick();
        true
    }

    fn on_tick(&mut self) {
        let elapsed_ms = self.last_tick.elapsed().as_millis() as u64;
        if elapsed_ms == 0 {
            return;
        }
        self.last_tick = Instant::now();

        if self.controller.phase() == RecorderPhase::Recording {
            self.sample_silence(elapsed_ms);
            self.recording_ms += elapsed_ms;
            let seconds = self.recording_ms / 1_000;
            if seconds != self.recording_last_sec {
                self.recording_last_sec = seconds;
                self.emit(UiEvent::RecordingTick { seconds });
            }
        }

        if let Some(flow) = self.flow.as_mut() {
            let actions = flow.on_tick(elapsed_ms);
            self.run_actions(actions);
        }

        self.checkpoint_elapsed_ms += elapsed_ms;
        if self.checkpoint_elapsed_ms >= self.config.transport.checkpoint_interval_ms {
            self.checkpoint_elapsed_ms = 0;
            self.try_checkpoint(false);
        }
    }

    /// One detector sample: classify the latest window and feed the
    /// tracker. Only called while a recording is active.
    fn sample_silence(&mut self, elapsed_ms: u64) {
        let class = match self.tap.as_mut() {
            // No analysis capability on this platform: never silent.
            None => SampleClass::Speaking,
            Some(tap) => {
                let stream_live = self
                    .devices
                    .stream()
                    .map(|stream| stream.audio_live())
                    .unwrap_or(false);
                if !stream_live || !tap.mic_live() {
                    SampleClass::Silent
                } else {
                    match tap.window() {
                        Some(window) => {
                            classify_window(&window, true, self.tracker.policy().threshold)
                        }
                        None => SampleClass::Silent,
                    }
                }
            }
        };

        let update = self.tracker.on_sample(class, elapsed_ms);
        self.stage_peak = self.stage_peak.max(update.stage.index());
        let silent_secs = update.elapsed_silent_ms / 1_000;
        if update.stage_changed || silent_secs != self.silence_last_sec {
            self.silence_last_sec = silent_secs;
            self.emit(UiEvent::SilenceUpdate {
                stage: update.stage.index(),
                silent_secs,
            });
        }
        if update.auto_stop {
            let actions = self
                .flow
                .as_mut()
                .map(|flow| flow.on_auto_stop())
                .unwrap_or_default();
            self.run_actions(actions);
        }
    }

    /// Returns false when the loop should exit.
    fn handle_event(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Command(command) => return self.handle_command(command),
            EngineEvent::SessionLoaded(result) => self.on_session_loaded(result),
            EngineEvent::SpeechFetched { key, result } => {
                match self.speech.on_fetch_complete(&key, result) {
                    Some(FetchOutcome::Play { generation, clip }) => {
                        self.play_clip(generation, clip);
                    }
                    Some(FetchOutcome::Failed { error, .. }) => {
                        let actions = self.with_flow(|flow| flow.on_speech_failed(error.to_string()));
                        self.run_actions(actions);
                    }
                    None => {}
                }
            }
            EngineEvent::ClipEnded { generation } => {
                if self.speech.on_clip_ended(generation) {
                    let actions = self.with_flow(|flow| flow.on_speech_ended());
                    self.run_actions(actions);
                }
            }
            EngineEvent::ClipFailed { generation, error } => {
                if self.speech.on_clip_failed(generation) {
                    let actions = self.with_flow(|flow| flow.on_speech_failed(error.to_string()));
                    self.run_actions(actions);
                }
            }
            EngineEvent::RecordingFinished { blob } => self.on_recording_finished(blob),
            EngineEvent::UploadFinished { response, result } => {
                self.on_upload_finished(response, result)
            }
            EngineEvent::SubmitFinished { result } => match result {
                Ok(()) => {
                    // The session is over; stop holding the devices.
                    self.devices.release();
                    let actions = self.with_flow(|flow| flow.on_submit_success());
                    self.run_actions(actions);
                }
                Err(err) => {
                    let actions = self.with_flow(|flow| flow.on_submit_failure(err.to_string()));
                    self.run_actions(actions);
                }
            },
            EngineEvent::CheckpointDelivered { snapshot, result } => {
                self.checkpoint_in_flight = false;
                match result {
                    Ok(()) => {
                        self.integrity.mark_delivered(&snapshot);
                        // Signals that arrived while this delivery was in
                        // flight go out now instead of waiting a full
                        // interval. Dedup keeps this from looping.
                        self.try_checkpoint(false);
                    }
                    // Never surfaced to the applicant; the next checkpoint
                    // simply carries the same payload again.
                    Err(err) => tracing::debug!("integrity_checkpoint_failed|{err}"),
                }
            }
        }
        true
    }

    fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Consent => {
                self.integrity.on_consent(Utc::now());
                let request = StreamRequest {
                    video_device: None,
                    audio_device: self.config.input_device.clone(),
                };
                if let Err(err) = self.devices.acquire(request).map(|_| ()) {
                    // The countdown still runs; recording start will retry
                    // acquisition and surface its own error if this holds.
                    self.emit(UiEvent::Error {
                        message: err.to_string(),
                        recoverable: true,
                    });
                }
                let actions = self.with_flow(|flow| flow.on_consent());
                self.run_actions(actions);
            }
            EngineCommand::StopRecording => {
                let actions = self.with_flow(|flow| flow.request_stop());
                self.run_actions(actions);
            }
            EngineCommand::SkipQuestion => {
                if self.controller.phase() == RecorderPhase::Recording {
                    self.controller.mark_skip();
                    self.emit(UiEvent::Message {
                        text: "Skipping this question for now.".to_string(),
                    });
                    let actions = self.with_flow(|flow| flow.request_stop());
                    self.run_actions(actions);
                }
            }
            EngineCommand::StartAnswer => {
                // Applicant opted to answer: clear the accumulated silence.
                let update = self.tracker.on_sample(SampleClass::Speaking, 0);
                if update.stage_changed || self.silence_last_sec != 0 {
                    self.silence_last_sec = 0;
                    self.emit(UiEvent::SilenceUpdate {
                        stage: 0,
                        silent_secs: 0,
                    });
                }
            }
            EngineCommand::ReplayQuestion => {
                let actions = self.with_flow(|flow| flow.replay());
                self.run_actions(actions);
            }
            EngineCommand::RetryUpload => {
                if let Some(response) = self.controller.begin_retry() {
                    let question_id = response.question_id;
                    let actions = self.with_flow(|flow| flow.on_upload_started(question_id));
                    self.run_actions(actions);
                    spawn_upload(self.api.clone(), response, self.handle.clone());
                }
            }
            EngineCommand::Submit => {
                let actions = self.with_flow(|flow| flow.on_submit_requested());
                self.run_actions(actions);
            }
            EngineCommand::FullscreenEntered => {
                // An actual enter proves the platform supports fullscreen.
                self.integrity.set_fullscreen_supported(true);
                self.integrity.on_fullscreen_entered();
            }
            EngineCommand::FullscreenExited => {
                if self.integrity.on_fullscreen_exited(Utc::now()) {
                    self.emit(UiEvent::IntegrityWarning {
                        message: "You left fullscreen. Please return to fullscreen to continue."
                            .to_string(),
                    });
                }
                self.try_checkpoint(false);
            }
            EngineCommand::FocusLost => self.integrity.on_focus_lost(Utc::now()),
            EngineCommand::FocusRegained => {
                self.integrity.on_focus_regained(Utc::now());
                self.try_checkpoint(false);
            }
            EngineCommand::TabHidden => self.integrity.on_tab_hidden(Utc::now()),
            EngineCommand::TabVisible => {
                self.integrity.on_focus_regained(Utc::now());
                self.try_checkpoint(false);
            }
            EngineCommand::PageHide => {
                self.integrity.on_page_hide(self.store.as_mut());
                self.try_checkpoint(true);
            }
            EngineCommand::Shutdown => {
                self.sink.stop();
                self.devices.release();
                return false;
            }
        }
        true
    }

    fn on_session_loaded(&mut self, result: Result<crate::api::SessionPayload, crate::error::ApiError>) {
        let outcome = result.and_then(Session::from_payload);
        match outcome {
            Ok((session, notice)) => {
                tracing::info!(
                    "session_loaded|public_id={}|questions={}|answered={}|resume_index={}",
                    session.public_id(),
                    session.question_count(),
                    session.answered_count(),
                    session.current_index()
                );
                let mut flow = SessionFlow::new(session, self.config.flow);
                let actions = flow.start(notice);
                self.flow = Some(flow);
                self.run_actions(actions);
            }
            Err(err) => {
                // No interview or no questions is terminal; nothing to pace.
                self.load_failed = true;
                self.emit(UiEvent::PhaseChanged {
                    phase: Phase::Failed,
                });
                self.emit(UiEvent::Error {
                    message: err.to_string(),
                    recoverable: false,
                });
            }
        }
    }

    fn on_recording_finished(&mut self, blob: MediaBlob) {
        let duration_secs = self.recording_ms / 1_000;
        if let Some(question_id) = self.controller.active_question() {
            tracing::info!(
                "capture_metrics|question_id={question_id}|recorded_ms={}|silent_ms={}|stage_peak={}",
                self.recording_ms,
                self.tracker.elapsed_silent_ms(),
                self.stage_peak
            );
        }
        match self.controller.on_chunks_ready(blob, duration_secs) {
            Some(StopOutcome::Skipped { .. }) => {
                let actions = self.with_flow(|flow| flow.on_question_skipped());
                self.run_actions(actions);
            }
            Some(StopOutcome::Upload(response)) => {
                let question_id = response.question_id;
                let actions = self.with_flow(|flow| flow.on_upload_started(question_id));
                self.run_actions(actions);
                spawn_upload(self.api.clone(), response, self.handle.clone());
            }
            None => {}
        }
    }

    fn on_upload_finished(
        &mut self,
        response: Response,
        result: Result<crate::api::UploadAck, crate::error::UploadError>,
    ) {
        match result {
            Ok(ack) => {
                if ack.transcript().is_none() {
                    tracing::debug!(
                        "transcript_unavailable|question_id={}|error={}",
                        response.question_id,
                        ack.transcription_error.as_deref().unwrap_or("none")
                    );
                }
                if let Some(question_id) = self.controller.on_upload_success() {
                    let transcript = ack.transcript().map(str::to_string);
                    let actions =
                        self.with_flow(|flow| flow.on_upload_success(question_id, transcript));
                    self.run_actions(actions);
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.controller.on_upload_failure(response);
                let actions = self.with_flow(|flow| flow.on_upload_failure(message));
                self.run_actions(actions);
            }
        }
    }

    fn run_actions(&mut self, actions: Vec<FlowAction>) {
        let mut queue: VecDeque<FlowAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                FlowAction::Ui(event) => self.emit(event),
                FlowAction::Speak { index } => {
                    let followups = self.do_speak(index);
                    queue.extend(followups);
                }
                FlowAction::StartRecording { question_id } => {
                    let followups = self.do_start_recording(question_id);
                    queue.extend(followups);
                }
                FlowAction::StopRecording => {
                    if self.controller.request_stop() {
                        self.recorder.request_stop();
                    }
                }
                FlowAction::Submit => {
                    let snapshot = self.integrity.snapshot(Utc::now());
                    spawn_submit(self.api.clone(), snapshot, self.handle.clone());
                }
            }
        }
    }

    fn do_speak(&mut self, index: usize) -> Vec<FlowAction> {
        let Some(flow) = self.flow.as_ref() else {
            return Vec::new();
        };
        let Some(question) = flow.session().question(index) else {
            return Vec::new();
        };
        let (question_id, text) = (question.id, question.text.clone());
        let cache_key = format!("q-{question_id}");

        if self.active_question != Some(question_id) {
            self.active_question = Some(question_id);
            self.tracker.reset_for_question();
            self.silence_last_sec = 0;
            self.stage_peak = 0;
        }

        match self.speech.speak(&text, Some(&cache_key)) {
            // Nothing to say; continue as if the clip finished instantly.
            None => self.with_flow(|flow| flow.on_speech_ended()),
            Some(SpeakDispatch::Play { generation, clip }) => self.play_clip_inner(generation, clip),
            Some(SpeakDispatch::Fetch { key, text, .. }) => {
                spawn_speech_fetch(self.api.clone(), key, text, self.handle.clone());
                Vec::new()
            }
            Some(SpeakDispatch::Joined { .. }) => Vec::new(),
        }
    }

    fn play_clip(&mut self, generation: u64, clip: Arc<[u8]>) {
        let actions = self.play_clip_inner(generation, clip);
        self.run_actions(actions);
    }

    /// Only one clip may play at a time: the current one is stopped
    /// unconditionally before the new one starts.
    fn play_clip_inner(&mut self, generation: u64, clip: Arc<[u8]>) -> Vec<FlowAction> {
        self.sink.stop();
        match self.sink.play(generation, clip) {
            Ok(()) => {
                self.speech.on_playback_started(generation);
                self.with_flow(|flow| flow.on_speech_started())
            }
            Err(err) => {
                self.speech.on_clip_failed(generation);
                self.with_flow(|flow| flow.on_speech_failed(err.to_string()))
            }
        }
    }

    fn do_start_recording(&mut self, question_id: QuestionId) -> Vec<FlowAction> {
        if self.devices.stream().is_none() {
            let request = StreamRequest {
                video_device: None,
                audio_device: self.config.input_device.clone(),
            };
            if let Err(err) = self.devices.acquire(request).map(|_| ()) {
                return self.with_flow(|flow| flow.on_record_start_failed(err.to_string()));
            }
        }
        let stream = match self.devices.stream() {
            Some(stream) => stream.clone(),
            None => return Vec::new(),
        };

        match self.controller.start(question_id, &stream) {
            Ok(()) => match self.recorder.start(&stream) {
                Ok(()) => {
                    self.recording_ms = 0;
                    self.recording_last_sec = 0;
                    self.with_flow(|flow| flow.on_recording_started(question_id))
                }
                Err(err) => {
                    self.controller.abort();
                    self.with_flow(|flow| flow.on_record_start_failed(err.to_string()))
                }
            },
            // Already recording or uploading: the start is a no-op.
            Err(StartError::AlreadyActive) => Vec::new(),
            Err(StartError::Device(err)) => {
                self.with_flow(|flow| flow.on_record_start_failed(err.to_string()))
            }
        }
    }

    /// Build and deliver a checkpoint if the totals changed. Teardown
    /// delivery goes through the beacon and must not wait for the server.
    fn try_checkpoint(&mut self, teardown: bool) {
        if !self.integrity.consented() || self.checkpoint_in_flight {
            return;
        }
        let Some(snapshot) = self.integrity.checkpoint(Utc::now()) else {
            return;
        };
        if teardown {
            match self.api.post_checkpoint_beacon(&snapshot) {
                // Fire-and-forget counts as sent; there is nobody left to
                // observe a failure during teardown anyway.
                Ok(()) => self.integrity.mark_delivered(&snapshot),
                Err(IntegrityDeliveryError::BeaconUnavailable) => {
                    self.checkpoint_in_flight = true;
                    spawn_checkpoint(self.api.clone(), snapshot, self.handle.clone());
                }
                Err(err) => tracing::debug!("integrity_beacon_failed|{err}"),
            }
        } else {
            self.checkpoint_in_flight = true;
            spawn_checkpoint(self.api.clone(), snapshot, self.handle.clone());
        }
    }

    fn with_flow(&mut self, f: impl FnOnce(&mut SessionFlow) -> Vec<FlowAction>) -> Vec<FlowAction> {
        self.flow.as_mut().map(f).unwrap_or_default()
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.ui_tx.send(event);
    }
}

// ============================================================================
// Worker threads
// ============================================================================

fn spawn_session_load(api: Arc<dyn InterviewApi>, handle: EngineHandle) {
    thread::spawn(move || {
        let result = api.fetch_session();
        handle.send(EngineEvent::SessionLoaded(result));
    });
}

fn spawn_speech_fetch(api: Arc<dyn InterviewApi>, key: String, text: String, handle: EngineHandle) {
    thread::spawn(move || {
        let result = api.synthesize(&text);
        handle.send(EngineEvent::SpeechFetched { key, result });
    });
}

fn spawn_upload(api: Arc<dyn InterviewApi>, response: Response, handle: EngineHandle) {
    thread::spawn(move || {
        let request = UploadRequest::new(
            response.question_id,
            response.blob.clone(),
            response.duration_secs,
        );
        let started = Instant::now();
        let result = api.upload_response(&request);
        tracing::info!(
            "upload|question_id={}|bytes={}|elapsed_ms={}|ok={}",
            response.question_id,
            response.blob.bytes.len(),
            started.elapsed().as_millis(),
            result.is_ok()
        );
        handle.send(EngineEvent::UploadFinished { response, result });
    });
}

fn spawn_submit(api: Arc<dyn InterviewApi>, snapshot: IntegritySnapshot, handle: EngineHandle) {
    thread::spawn(move || {
        let result = api.submit(&snapshot);
        handle.send(EngineEvent::SubmitFinished { result });
    });
}

fn spawn_checkpoint(api: Arc<dyn InterviewApi>, snapshot: IntegritySnapshot, handle: EngineHandle) {
    thread::spawn(move || {
        let result = api.post_checkpoint(&snapshot);
        handle.send(EngineEvent::CheckpointDelivered { snapshot, result });
    });
}
