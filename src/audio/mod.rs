//! Audio analysis for the live interview stream.
//!
//! The engine never decodes or encodes media; it only inspects the
//! microphone signal to drive the silence escalation policy and the live
//! level meter shown to the applicant.

pub mod meter;
pub mod silence;
#[cfg(test)]
mod tests;

pub use meter::LiveMeter;
pub use silence::{
    classify_window, SampleClass, SilencePolicy, SilenceStage, SilenceTracker, SilenceUpdate,
};

/// Live analysis view over the session microphone. The engine polls this on
/// its sampling cadence while a recording is active; embedders without any
/// audio-analysis capability simply provide no tap, and the detector
/// degrades to treating the applicant as always speaking.
pub trait AudioTap: Send {
    /// False when the platform reports the microphone track disabled or
    /// ended. A dead mic counts as silence, not as a missing capability.
    fn mic_live(&self) -> bool;

    /// Most recent window of [-1, 1] mono samples. `None` means no fresh
    /// window yet, which classifies as silence while the mic is live.
    fn window(&mut self) -> Option<Vec<f32>>;
}

/// Downmix multi-channel input to mono while applying the provided converter
/// so analysis sees a single channel regardless of the microphone layout.
#[cfg_attr(not(any(feature = "native-mic", test)), allow(dead_code))]
pub(crate) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    // Average each interleaved frame to produce a mono representation.
    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}
