//! Cross-field validation for [`EngineConfig`].

use super::defaults::{MAX_SAMPLE_INTERVAL_MS, MIN_SAMPLE_INTERVAL_MS};
use super::EngineConfig;
use crate::error::EngineError;

impl EngineConfig {
    /// Validate policy values that the type system cannot enforce. Called
    /// once when the engine is constructed; a bad config never reaches the
    /// applicant mid-interview.
    pub fn validate(&self) -> Result<(), EngineError> {
        let s = &self.silence;
        if !(s.threshold > 0.0 && s.threshold <= 1.0) {
            return Err(config_error(format!(
                "silence threshold must be in (0, 1], got {}",
                s.threshold
            )));
        }
        if !(MIN_SAMPLE_INTERVAL_MS..=MAX_SAMPLE_INTERVAL_MS).contains(&s.sample_interval_ms) {
            return Err(config_error(format!(
                "sample interval must be {MIN_SAMPLE_INTERVAL_MS}-{MAX_SAMPLE_INTERVAL_MS} ms, got {}",
                s.sample_interval_ms
            )));
        }
        // The stage ladder must stay strictly ordered; the exact values are
        // free policy.
        let ladder = [s.gentle_ms, s.supportive_ms, s.options_ms, s.auto_stop_ms];
        if !ladder.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(config_error(format!(
                "silence stages must be strictly increasing, got {ladder:?}"
            )));
        }
        if s.gentle_ms == 0 {
            return Err(config_error("first silence stage must be nonzero".into()));
        }

        if self.flow.record_start_delay_ms == 0 {
            return Err(config_error(
                "record start delay must be nonzero so speech end and record start stay ordered"
                    .into(),
            ));
        }

        let t = &self.transport;
        for (name, value) in [
            ("upload timeout", t.upload_timeout_ms),
            ("speech timeout", t.speech_timeout_ms),
            ("request timeout", t.request_timeout_ms),
            ("checkpoint interval", t.checkpoint_interval_ms),
        ] {
            if value == 0 {
                return Err(config_error(format!("{name} must be nonzero")));
            }
        }

        if self.voice.voice_id.trim().is_empty() || self.voice.language.trim().is_empty() {
            return Err(config_error("voice id and language must be set".into()));
        }

        Ok(())
    }
}

fn config_error(message: String) -> EngineError {
    EngineError::Config(message)
}
