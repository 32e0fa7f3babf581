//! The interview pacing state machine.
//!
//! Pure state: every input is an explicit method call and every output is
//! a [`FlowAction`] for the engine to execute, so the whole question cycle
//! can be driven in tests with scripted events and a synthetic clock. The
//! ordering guarantees live here: speech end precedes recording start,
//! recording stop precedes upload, upload success precedes advancing.

use super::events::UiEvent;
use super::{QuestionId, ResumeNotice, Session};
use crate::config::FlowConfig;
use serde::Serialize;

/// Orchestrator phase, exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Loading,
    AwaitingConsent,
    Countdown,
    Speaking,
    Recording,
    Uploading,
    /// Parked with everything needed for submission: the auto-submit grace
    /// window, the all-answered resume case, and submit retries.
    AwaitingSubmit,
    Submitting,
    Done,
    Failed,
}

/// Side effects the engine performs on the flow's behalf.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FlowAction {
    Speak { index: usize },
    StartRecording { question_id: QuestionId },
    StopRecording,
    Submit,
    Ui(UiEvent),
}

/// At most one delay is ever armed: the pause between speech end and
/// recording start, or the grace window before auto-submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingTimer {
    RecordStart {
        question_id: QuestionId,
        remaining_ms: u64,
    },
    SubmitGrace {
        remaining_ms: u64,
    },
}

pub(crate) struct SessionFlow {
    session: Session,
    cfg: FlowConfig,
    phase: Phase,
    countdown_remaining_ms: u64,
    pending: Option<PendingTimer>,
}

impl SessionFlow {
    pub(crate) fn new(session: Session, cfg: FlowConfig) -> Self {
        Self {
            session,
            cfg,
            phase: Phase::Loading,
            countdown_remaining_ms: 0,
            pending: None,
        }
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Announce the loaded session and wait for consent.
    pub(crate) fn start(&mut self, notice: ResumeNotice) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        actions.push(FlowAction::Ui(UiEvent::SessionReady {
            total_questions: self.session.question_count(),
            answered: self.session.answered_count(),
            resume_index: self.session.current_index(),
        }));
        self.emit_question(&mut actions);
        if notice == ResumeNotice::AllAnswered {
            message(&mut actions, "All questions have been answered.");
        }
        self.set_phase(Phase::AwaitingConsent, &mut actions);
        actions
    }

    pub(crate) fn on_consent(&mut self) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        if self.phase != Phase::AwaitingConsent {
            return actions;
        }
        self.set_phase(Phase::Countdown, &mut actions);
        self.countdown_remaining_ms = self.cfg.countdown_secs * 1_000;
        actions.push(FlowAction::Ui(UiEvent::CountdownTick {
            seconds_left: self.cfg.countdown_secs,
        }));
        if self.countdown_remaining_ms == 0 {
            self.begin_question_cycle(&mut actions);
        }
        actions
    }

    /// Advance internal timers by `elapsed_ms` of wall time.
    pub(crate) fn on_tick(&mut self, elapsed_ms: u64) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        if self.phase == Phase::Countdown {
            let before = self.countdown_remaining_ms.div_ceil(1_000);
            self.countdown_remaining_ms = self.countdown_remaining_ms.saturating_sub(elapsed_ms);
            let after = self.countdown_remaining_ms.div_ceil(1_000);
            if self.countdown_remaining_ms == 0 {
                self.begin_question_cycle(&mut actions);
            } else if after != before {
                actions.push(FlowAction::Ui(UiEvent::CountdownTick {
                    seconds_left: after,
                }));
            }
            return actions;
        }

        match self.pending {
            Some(PendingTimer::RecordStart {
                question_id,
                remaining_ms,
            }) => {
                let remaining_ms = remaining_ms.saturating_sub(elapsed_ms);
                if remaining_ms == 0 {
                    self.pending = None;
                    // The delay only arms in Speaking; re-check the answer
                    // state in case a replay landed on an answered question.
                    if self.phase == Phase::Speaking && !self.session.is_answered(question_id) {
                        actions.push(FlowAction::StartRecording { question_id });
                    }
                } else {
                    self.pending = Some(PendingTimer::RecordStart {
                        question_id,
                        remaining_ms,
                    });
                }
            }
            Some(PendingTimer::SubmitGrace { remaining_ms }) => {
                let remaining_ms = remaining_ms.saturating_sub(elapsed_ms);
                if remaining_ms == 0 {
                    self.pending = None;
                    self.begin_submit(&mut actions);
                } else {
                    self.pending = Some(PendingTimer::SubmitGrace { remaining_ms });
                }
            }
            None => {}
        }
        actions
    }

    pub(crate) fn on_speech_started(&mut self) -> Vec<FlowAction> {
        vec![FlowAction::Ui(UiEvent::SpeechStarted)]
    }

    pub(crate) fn on_speech_ended(&mut self) -> Vec<FlowAction> {
        self.schedule_record_start();
        vec![FlowAction::Ui(UiEvent::SpeechEnded { error: None })]
    }

    /// Playback failed. Continuation is identical to a clean end: the
    /// interview proceeds to recording even when the speaker is broken.
    pub(crate) fn on_speech_failed(&mut self, error: String) -> Vec<FlowAction> {
        self.schedule_record_start();
        vec![FlowAction::Ui(UiEvent::SpeechEnded { error: Some(error) })]
    }

    pub(crate) fn on_recording_started(&mut self, question_id: QuestionId) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        self.set_phase(Phase::Recording, &mut actions);
        actions.push(FlowAction::Ui(UiEvent::RecordingStarted { question_id }));
        actions
    }

    pub(crate) fn on_record_start_failed(&mut self, message: String) -> Vec<FlowAction> {
        vec![FlowAction::Ui(UiEvent::Error {
            message,
            recoverable: true,
        })]
    }

    /// Twenty seconds of unbroken silence: stop and move on. The engine
    /// routes this at most once per question via the tracker's latch.
    pub(crate) fn on_auto_stop(&mut self) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        if self.phase == Phase::Recording {
            message(
                &mut actions,
                "No response recorded for this question. Continuing.",
            );
            actions.push(FlowAction::StopRecording);
        }
        actions
    }

    pub(crate) fn request_stop(&mut self) -> Vec<FlowAction> {
        if self.phase == Phase::Recording {
            vec![FlowAction::StopRecording]
        } else {
            Vec::new()
        }
    }

    /// The skipped recording was discarded; advance without an upload.
    pub(crate) fn on_question_skipped(&mut self) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        message(&mut actions, "Question skipped. You can answer it later.");
        if self.session.is_last_question() {
            // Nowhere further to go; the question stays open for a retake.
            self.set_phase(Phase::Speaking, &mut actions);
        } else {
            self.advance_and_speak(&mut actions);
        }
        actions
    }

    pub(crate) fn on_upload_started(&mut self, question_id: QuestionId) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        self.set_phase(Phase::Uploading, &mut actions);
        actions.push(FlowAction::Ui(UiEvent::UploadStarted { question_id }));
        actions
    }

    pub(crate) fn on_upload_success(
        &mut self,
        question_id: QuestionId,
        transcript: Option<String>,
    ) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        self.session.mark_answered(question_id);
        actions.push(FlowAction::Ui(UiEvent::UploadSucceeded {
            question_id,
            answered: self.session.answered_count(),
            total: self.session.question_count(),
            transcript,
        }));

        if self.session.is_last_question() {
            // Auto-submit after the grace delay, with no further input.
            message(
                &mut actions,
                "All questions answered. Ready to submit your interview!",
            );
            self.set_phase(Phase::AwaitingSubmit, &mut actions);
            if self.cfg.auto_submit_grace_ms == 0 {
                self.begin_submit(&mut actions);
            } else {
                self.pending = Some(PendingTimer::SubmitGrace {
                    remaining_ms: self.cfg.auto_submit_grace_ms,
                });
            }
        } else {
            self.advance_and_speak(&mut actions);
        }
        actions
    }

    pub(crate) fn on_upload_failure(&mut self, message: String) -> Vec<FlowAction> {
        vec![FlowAction::Ui(UiEvent::UploadFailed { message })]
    }

    /// Explicit submission, used from the all-answered resume state and to
    /// retry after a submit failure.
    pub(crate) fn on_submit_requested(&mut self) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        if self.session.submitted() || self.phase == Phase::Submitting {
            return actions;
        }
        if self.phase == Phase::AwaitingSubmit || self.session.all_answered() {
            self.begin_submit(&mut actions);
        } else {
            actions.push(FlowAction::Ui(UiEvent::Error {
                message: format!(
                    "Please answer all {} questions before submitting.",
                    self.session.question_count()
                ),
                recoverable: true,
            }));
        }
        actions
    }

    pub(crate) fn on_submit_success(&mut self) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        self.session.mark_submitted();
        message(&mut actions, "Interview submitted.");
        self.set_phase(Phase::Done, &mut actions);
        actions
    }

    /// Submission failed; everything answered stays answered, so retrying
    /// is always safe.
    pub(crate) fn on_submit_failure(&mut self, error: String) -> Vec<FlowAction> {
        let mut actions = Vec::new();
        self.set_phase(Phase::AwaitingSubmit, &mut actions);
        actions.push(FlowAction::Ui(UiEvent::Error {
            message: error,
            recoverable: true,
        }));
        actions
    }

    pub(crate) fn replay(&mut self) -> Vec<FlowAction> {
        match self.phase {
            Phase::Speaking | Phase::Recording | Phase::AwaitingSubmit => {
                vec![FlowAction::Speak {
                    index: self.session.current_index(),
                }]
            }
            _ => Vec::new(),
        }
    }

    fn begin_question_cycle(&mut self, actions: &mut Vec<FlowAction>) {
        if self.session.all_answered() {
            message(actions, "All questions have been answered.");
            self.set_phase(Phase::AwaitingSubmit, actions);
            return;
        }
        self.set_phase(Phase::Speaking, actions);
        actions.push(FlowAction::Speak {
            index: self.session.current_index(),
        });
    }

    fn advance_and_speak(&mut self, actions: &mut Vec<FlowAction>) {
        self.session.advance();
        self.emit_question(actions);
        self.set_phase(Phase::Speaking, actions);
        actions.push(FlowAction::Speak {
            index: self.session.current_index(),
        });
    }

    fn schedule_record_start(&mut self) {
        let question = self.session.current_question();
        if self.phase == Phase::Speaking && !self.session.is_answered(question.id) {
            self.pending = Some(PendingTimer::RecordStart {
                question_id: question.id,
                remaining_ms: self.cfg.record_start_delay_ms,
            });
        }
    }

    fn begin_submit(&mut self, actions: &mut Vec<FlowAction>) {
        self.pending = None;
        self.set_phase(Phase::Submitting, actions);
        actions.push(FlowAction::Submit);
    }

    fn emit_question(&self, actions: &mut Vec<FlowAction>) {
        let question = self.session.current_question();
        actions.push(FlowAction::Ui(UiEvent::QuestionChanged {
            index: self.session.current_index(),
            total: self.session.question_count(),
            question_id: question.id,
            text: question.text.clone(),
            question_type: question.question_type.clone(),
            answered: self.session.is_answered(question.id),
        }));
    }

    fn set_phase(&mut self, phase: Phase, actions: &mut Vec<FlowAction>) {
        if self.phase == phase {
            return;
        }
        // A pending delay belongs to the phase that armed it.
        match (self.pending, phase) {
            (Some(PendingTimer::RecordStart { .. }), Phase::Speaking) => {}
            (Some(PendingTimer::RecordStart { .. }), _) => self.pending = None,
            (Some(PendingTimer::SubmitGrace { .. }), Phase::AwaitingSubmit) => {}
            (Some(PendingTimer::SubmitGrace { .. }), _) => self.pending = None,
            (None, _) => {}
        }
        tracing::debug!("phase|{:?}->{:?}", self.phase, phase);
        self.phase = phase;
        actions.push(FlowAction::Ui(UiEvent::PhaseChanged { phase }));
    }
}

fn message(actions: &mut Vec<FlowAction>, text: &str) {
    actions.push(FlowAction::Ui(UiEvent::Message {
        text: text.to_string(),
    }));
}
