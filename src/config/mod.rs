//! Engine configuration: policy constants, timeouts, and voice selection.
//!
//! Embedders construct an [`EngineConfig`] directly or load one from YAML.
//! Every field has a default matching the shipped product behavior, so
//! `EngineConfig::default()` is a complete, valid configuration.

mod defaults;
mod validation;

use serde::Deserialize;
use std::path::Path;

pub use defaults::*;

use crate::error::EngineError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub voice: VoiceConfig,
    pub silence: SilenceConfig,
    pub flow: FlowConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
    /// Preferred microphone name for the native capture path. `None` uses
    /// the platform default input.
    pub input_device: Option<String>,
}

/// Voice selection for synthesized question audio. Part of the TTS cache
/// key, so changing either value invalidates cached clips.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub voice_id: String,
    pub language: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: DEFAULT_VOICE_ID.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// Silence escalation policy. Stage thresholds must be strictly increasing;
/// see `validate`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    pub threshold: f32,
    pub sample_interval_ms: u64,
    pub gentle_ms: u64,
    pub supportive_ms: u64,
    pub options_ms: u64,
    pub auto_stop_ms: u64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SILENCE_THRESHOLD,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            gentle_ms: DEFAULT_STAGE_GENTLE_MS,
            supportive_ms: DEFAULT_STAGE_SUPPORTIVE_MS,
            options_ms: DEFAULT_STAGE_OPTIONS_MS,
            auto_stop_ms: DEFAULT_STAGE_AUTO_STOP_MS,
        }
    }
}

/// Question-cycle pacing.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub countdown_secs: u64,
    pub record_start_delay_ms: u64,
    pub auto_submit_grace_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            record_start_delay_ms: DEFAULT_RECORD_START_DELAY_MS,
            auto_submit_grace_ms: DEFAULT_AUTO_SUBMIT_GRACE_MS,
        }
    }
}

/// Per-endpoint network timeouts and checkpoint cadence.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub upload_timeout_ms: u64,
    pub speech_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub checkpoint_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            upload_timeout_ms: DEFAULT_UPLOAD_TIMEOUT_MS,
            speech_timeout_ms: DEFAULT_SPEECH_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            checkpoint_interval_ms: DEFAULT_CHECKPOINT_INTERVAL_MS,
        }
    }
}

/// File-logging switches. `no_logs` wins over everything else.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub logs: bool,
    pub log_timings: bool,
    pub no_logs: bool,
}

impl EngineConfig {
    /// Parse a config from YAML and validate it.
    pub fn from_yaml_str(source: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_yaml::from_str(source)
            .map_err(|err| EngineError::Config(format!("invalid config yaml: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML config file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, EngineError> {
        let source = std::fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("cannot read {}: {err}", path.display())))?;
        Self::from_yaml_str(&source)
    }
}
