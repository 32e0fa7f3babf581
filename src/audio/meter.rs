use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const DEFAULT_METER_DB: f32 = -60.0;

/// Lock-free microphone level shared between the capture callback thread and
/// the engine thread. Stores the f32 level as raw bits in an atomic.
#[derive(Clone, Debug)]
pub struct LiveMeter {
    level_bits: Arc<AtomicU32>,
}

impl LiveMeter {
    pub fn new() -> Self {
        Self {
            level_bits: Arc::new(AtomicU32::new(DEFAULT_METER_DB.to_bits())),
        }
    }

    pub fn set_db(&self, db: f32) {
        self.level_bits.store(db.to_bits(), Ordering::Relaxed);
    }

    pub fn level_db(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }
}

impl Default for LiveMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Root-mean-square energy on a [0, 1] scale. This is what the silence
/// threshold compares against.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    energy.sqrt()
}

/// RMS expressed in decibels for meter display, floored at the meter default.
pub fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return DEFAULT_METER_DB;
    }
    let level = rms(samples).max(1e-6);
    20.0 * level.log10()
}
