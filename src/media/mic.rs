//! Native microphone tap via CPAL.
//!
//! The stock [`AudioTap`] used by the silence detector when the embedder
//! does not bridge its own audio analysis. Keeps a short rolling window of
//! mono samples for RMS classification and feeds the live level meter shown
//! to the applicant. All formats are converted to f32 up front so the
//! analysis path stays format-agnostic.

use crate::audio::{append_downmixed_samples, meter::rms_db, AudioTap, LiveMeter};
use crate::error::DeviceError;
use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::bounded;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Samples kept for analysis per tick. Roughly 45 ms at 44.1 kHz, enough
/// for a stable RMS estimate.
const WINDOW_SAMPLES: usize = 2048;

/// How long to wait for the capture thread to report stream startup.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

struct TapShared {
    window: Mutex<VecDeque<f32>>,
    live: AtomicBool,
}

/// Long-lived microphone capture. CPAL streams are not `Send`, so the
/// stream lives on a dedicated thread that parks until the tap is dropped;
/// the engine thread only ever touches the shared sample window.
pub struct MicTap {
    shared: Arc<TapShared>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MicTap {
    /// List input device names for a microphone selector.
    pub fn list_devices() -> Result<Vec<String>, DeviceError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| DeviceError::Unknown(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    /// Open the preferred (or default) input device and start capturing.
    pub fn start(preferred_device: Option<&str>, meter: LiveMeter) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = match preferred_device {
            Some(name) => {
                let mut devices = host
                    .input_devices()
                    .map_err(|e| DeviceError::Unknown(e.to_string()))?;
                devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or(DeviceError::ConstraintUnsatisfiable)?
            }
            None => host
                .default_input_device()
                .ok_or(DeviceError::MicrophoneMissing)?,
        };

        let shared = Arc::new(TapShared {
            window: Mutex::new(VecDeque::with_capacity(WINDOW_SAMPLES)),
            live: AtomicBool::new(true),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        let thread_shared = shared.clone();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("intervox-mic".into())
            .spawn(move || {
                capture_loop(device, thread_shared, thread_stop, meter, ready_tx);
            })
            .map_err(|e| DeviceError::Unknown(format!("capture thread: {e}")))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                shared,
                stop,
                handle: Some(handle),
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                // Tell the late-starting capture thread to wind down.
                stop.store(true, Ordering::Relaxed);
                Err(DeviceError::Unknown(
                    "microphone stream did not start in time".into(),
                ))
            }
        }
    }
}

impl AudioTap for MicTap {
    fn mic_live(&self) -> bool {
        self.shared.live.load(Ordering::Relaxed)
    }

    fn window(&mut self) -> Option<Vec<f32>> {
        let window = self.shared.window.lock().unwrap_or_else(|e| e.into_inner());
        if window.is_empty() {
            return None;
        }
        Some(window.iter().copied().collect())
    }
}

impl Drop for MicTap {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn push_window(shared: &TapShared, meter: &LiveMeter, samples: &[f32]) {
    let mut window = shared.window.lock().unwrap_or_else(|e| e.into_inner());
    for &sample in samples {
        if window.len() == WINDOW_SAMPLES {
            window.pop_front();
        }
        window.push_back(sample);
    }
    window.make_contiguous();
    let (latest, _) = window.as_slices();
    meter.set_db(rms_db(latest));
}

fn capture_loop(
    device: cpal::Device,
    shared: Arc<TapShared>,
    stop: Arc<AtomicBool>,
    meter: LiveMeter,
    ready_tx: crossbeam_channel::Sender<Result<(), DeviceError>>,
) {
    let stream = match build_and_play(&device, &shared, &meter) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(DeviceError::Unknown(format!("{e:#}"))));
            return;
        }
    };

    while !stop.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(25));
    }
    shared.live.store(false, Ordering::Relaxed);
    drop(stream);
}

fn build_and_play(
    device: &cpal::Device,
    shared: &Arc<TapShared>,
    meter: &LiveMeter,
) -> Result<cpal::Stream> {
    let default_config = device
        .default_input_config()
        .context("query input format")?;
    let format = default_config.sample_format();
    let config: StreamConfig = default_config.into();
    let channels = usize::from(config.channels.max(1));

    tracing::debug!(
        "mic_tap_config|format={format:?}|sample_rate={}|channels={channels}",
        config.sample_rate.0
    );

    let err_shared = shared.clone();
    let err_fn = move |err| {
        tracing::debug!("mic_stream_error|{err}");
        err_shared.live.store(false, Ordering::Relaxed);
    };

    let mut scratch: Vec<f32> = Vec::new();
    macro_rules! input_stream {
        ($ty:ty, $convert:expr) => {{
            let cb_shared = shared.clone();
            let cb_meter = meter.clone();
            device.build_input_stream(
                &config,
                move |data: &[$ty], _| {
                    scratch.clear();
                    append_downmixed_samples(&mut scratch, data, channels, $convert);
                    push_window(&cb_shared, &cb_meter, &scratch);
                },
                err_fn,
                None,
            )
        }};
    }

    let stream = match format {
        SampleFormat::F32 => input_stream!(f32, |sample| sample),
        SampleFormat::I16 => input_stream!(i16, |sample| sample as f32 / 32_768.0_f32),
        SampleFormat::U16 => {
            input_stream!(u16, |sample| (sample as f32 - 32_768.0_f32) / 32_768.0_f32)
        }
        other => return Err(anyhow!("unsupported sample format {other:?}")),
    }
    .context("open input stream")?;

    stream.play().context("start input stream")?;
    Ok(stream)
}
