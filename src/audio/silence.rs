//! Silence/engagement tracking for the active recording.
//!
//! Accumulates continuous silence and drives the four-stage escalation
//! policy. The tracker is a pure state machine fed classified samples and
//! elapsed wall time, so the policy can be tested without a microphone.

use crate::config::SilenceConfig;
use serde::Serialize;

/// Thresholds for the escalation ladder, copied out of the engine config so
/// the tracker carries no reference back into it.
#[derive(Debug, Clone, Copy)]
pub struct SilencePolicy {
    pub threshold: f32,
    pub sample_interval_ms: u64,
    pub gentle_ms: u64,
    pub supportive_ms: u64,
    pub options_ms: u64,
    pub auto_stop_ms: u64,
}

impl Default for SilencePolicy {
    fn default() -> Self {
        Self::from(&SilenceConfig::default())
    }
}

impl From<&SilenceConfig> for SilencePolicy {
    fn from(cfg: &SilenceConfig) -> Self {
        Self {
            threshold: cfg.threshold,
            sample_interval_ms: cfg.sample_interval_ms,
            gentle_ms: cfg.gentle_ms,
            supportive_ms: cfg.supportive_ms,
            options_ms: cfg.options_ms,
            auto_stop_ms: cfg.auto_stop_ms,
        }
    }
}

impl SilencePolicy {
    /// Stage for a given run of continuous silence. Monotone in the input,
    /// which is what makes stages non-decreasing within one silent run.
    pub fn stage_for(&self, silent_ms: u64) -> SilenceStage {
        if silent_ms >= self.auto_stop_ms {
            SilenceStage::AutoStop
        } else if silent_ms >= self.options_ms {
            SilenceStage::Options
        } else if silent_ms >= self.supportive_ms {
            SilenceStage::Supportive
        } else if silent_ms >= self.gentle_ms {
            SilenceStage::Gentle
        } else {
            SilenceStage::Active
        }
    }
}

/// Escalation stage, in increasing order of assertiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SilenceStage {
    Active,
    Gentle,
    Supportive,
    Options,
    AutoStop,
}

impl SilenceStage {
    /// Numeric form used in wire payloads and UI display (0-4).
    pub fn index(self) -> u8 {
        match self {
            SilenceStage::Active => 0,
            SilenceStage::Gentle => 1,
            SilenceStage::Supportive => 2,
            SilenceStage::Options => 3,
            SilenceStage::AutoStop => 4,
        }
    }
}

/// Classification of one sampled window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleClass {
    Speaking,
    Silent,
}

/// Classify a window of [0, 1]-normalized samples. A disabled or dead mic
/// track counts as silence; an absent analysis capability is handled by the
/// caller, which degrades to always-speaking instead.
pub fn classify_window(window: &[f32], mic_live: bool, threshold: f32) -> SampleClass {
    if !mic_live {
        return SampleClass::Silent;
    }
    if super::meter::rms(window) >= threshold {
        SampleClass::Speaking
    } else {
        SampleClass::Silent
    }
}

/// Result of feeding one sample into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceUpdate {
    pub elapsed_silent_ms: u64,
    pub stage: SilenceStage,
    /// True exactly once per stage transition, so consumers can react
    /// without diffing every tick.
    pub stage_changed: bool,
    /// True exactly once per question, when the auto-stop stage is first
    /// reached.
    pub auto_stop: bool,
}

/// Per-question silence state. Reset whenever the active question changes;
/// a single speaking sample clears all accumulated silence.
#[derive(Debug)]
pub struct SilenceTracker {
    policy: SilencePolicy,
    silent_ms: u64,
    stage: SilenceStage,
    auto_stop_fired: bool,
}

impl SilenceTracker {
    pub fn new(policy: SilencePolicy) -> Self {
        Self {
            policy,
            silent_ms: 0,
            stage: SilenceStage::Active,
            auto_stop_fired: false,
        }
    }

    pub fn policy(&self) -> &SilencePolicy {
        &self.policy
    }

    pub fn stage(&self) -> SilenceStage {
        self.stage
    }

    pub fn elapsed_silent_ms(&self) -> u64 {
        self.silent_ms
    }

    /// Full reset, including the auto-stop latch. Only the question change
    /// path may call this; speech resumption goes through `on_sample`.
    pub fn reset_for_question(&mut self) {
        self.silent_ms = 0;
        self.stage = SilenceStage::Active;
        self.auto_stop_fired = false;
    }

    /// Feed one classified sample plus the wall time elapsed since the
    /// previous sample.
    pub fn on_sample(&mut self, class: SampleClass, elapsed_ms: u64) -> SilenceUpdate {
        match class {
            SampleClass::Speaking => {
                let stage_changed = self.stage != SilenceStage::Active;
                self.silent_ms = 0;
                self.stage = SilenceStage::Active;
                SilenceUpdate {
                    elapsed_silent_ms: 0,
                    stage: SilenceStage::Active,
                    stage_changed,
                    auto_stop: false,
                }
            }
            SampleClass::Silent => {
                self.silent_ms = self.silent_ms.saturating_add(elapsed_ms);
                let next = self.policy.stage_for(self.silent_ms);
                let stage_changed = next != self.stage;
                self.stage = next;
                let auto_stop = next == SilenceStage::AutoStop && !self.auto_stop_fired;
                if auto_stop {
                    self.auto_stop_fired = true;
                }
                SilenceUpdate {
                    elapsed_silent_ms: self.silent_ms,
                    stage: next,
                    stage_changed,
                    auto_stop,
                }
            }
        }
    }
}
