//! Local audio: capture sources, playback sinks and the narrowband codec.
//!
//! Capture yields 20ms PCM16 mono frames at the requested sample rate.
//! The peer connection carries G.711 u-law at 8kHz, so frames are
//! decimated and companded on the way out and expanded on the way in.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::base::AudioConstraints;
use crate::core::call::{CallError, CallResult};

/// Clock rate of the G.711 payload.
pub const PCMU_CLOCK_RATE: u32 = 8000;

/// Frames buffered between capture and the sender before old ones drop.
const CAPTURE_QUEUE_FRAMES: usize = 25;

const FRAME_INTERVAL: Duration = Duration::from_millis(20);

// =============================================================================
// Capture
// =============================================================================

/// Shared receiver of captured frames.
pub type FrameReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Vec<i16>>>>;

/// A running capture. Dropping it stops the device.
#[derive(Debug)]
pub struct CaptureStream {
    frames: FrameReceiver,
    stop: CancellationToken,
}

impl CaptureStream {
    pub fn new(frames: mpsc::Receiver<Vec<i16>>, stop: CancellationToken) -> Self {
        Self {
            frames: Arc::new(tokio::sync::Mutex::new(frames)),
            stop,
        }
    }

    pub fn frames(&self) -> FrameReceiver {
        Arc::clone(&self.frames)
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Source of microphone audio.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Start capturing. Fails with `CallError::DeviceError` when the
    /// device is missing or refuses the constraints.
    async fn start(&self, constraints: &AudioConstraints) -> CallResult<CaptureStream>;
}

/// Capture source for hosts without a microphone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapture;

#[async_trait]
impl CaptureSource for NoCapture {
    async fn start(&self, _constraints: &AudioConstraints) -> CallResult<CaptureStream> {
        Err(CallError::DeviceError(
            "no capture device configured".to_string(),
        ))
    }
}

/// Plays a WAV file in real time as if it were a microphone.
#[derive(Debug, Clone)]
pub struct WavCapture {
    path: PathBuf,
    looped: bool,
}

impl WavCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            looped: true,
        }
    }

    /// Stop after one pass instead of looping.
    pub fn once(mut self) -> Self {
        self.looped = false;
        self
    }

    fn load(path: &PathBuf, target_rate: u32) -> CallResult<Vec<i16>> {
        let mut reader = hound::WavReader::open(path).map_err(|e| {
            CallError::DeviceError(format!("Failed to open capture file {}: {e}", path.display()))
        })?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(CallError::DeviceError(format!(
                "Unsupported capture format in {}: {} bit {:?}",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            )));
        }

        let samples: Vec<i16> = reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| CallError::DeviceError(format!("Failed to read capture file: {e}")))?;

        let mono = downmix(&samples, spec.channels);
        Ok(resample_linear(&mono, spec.sample_rate, target_rate))
    }
}

#[async_trait]
impl CaptureSource for WavCapture {
    async fn start(&self, constraints: &AudioConstraints) -> CallResult<CaptureStream> {
        if constraints.channels != 1 {
            return Err(CallError::DeviceError(format!(
                "capture supports mono only, {} channels requested",
                constraints.channels
            )));
        }

        let path = self.path.clone();
        let rate = constraints.sample_rate;
        let samples = tokio::task::spawn_blocking(move || Self::load(&path, rate))
            .await
            .map_err(|e| CallError::DeviceError(format!("Capture loader failed: {e}")))??;

        if samples.is_empty() {
            return Err(CallError::DeviceError(format!(
                "Capture file {} has no audio",
                self.path.display()
            )));
        }

        info!(
            "Capturing from {} ({} samples at {}Hz)",
            self.path.display(),
            samples.len(),
            rate
        );

        let (tx, rx) = mpsc::channel(CAPTURE_QUEUE_FRAMES);
        let stop = CancellationToken::new();
        let frame_len = constraints.frame_samples();
        let looped = self.looped;
        let task_stop = stop.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_INTERVAL);
            let mut offset = 0usize;
            loop {
                tokio::select! {
                    _ = task_stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if offset >= samples.len() {
                    if !looped {
                        break;
                    }
                    offset = 0;
                }
                let end = (offset + frame_len).min(samples.len());
                let mut frame = samples[offset..end].to_vec();
                frame.resize(frame_len, 0);
                offset = end;

                match tx.try_send(frame) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            debug!("Capture task stopped");
        });

        Ok(CaptureStream::new(rx, stop))
    }
}

// =============================================================================
// Playback
// =============================================================================

/// Destination for remote audio.
pub trait PlaybackSink: Send + Sync {
    /// Write decoded PCM16 mono samples.
    fn write(&self, samples: &[i16], sample_rate: u32);

    /// Flush buffered audio.
    fn flush(&self) {}
}

/// Records remote audio to a WAV file.
pub struct WavRecorder {
    path: PathBuf,
    writer: Mutex<Option<hound::WavWriter<BufWriter<File>>>>,
    sample_rate: u32,
}

impl WavRecorder {
    pub fn create(path: impl Into<PathBuf>, sample_rate: u32) -> CallResult<Self> {
        let path = path.into();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec).map_err(|e| {
            CallError::DeviceError(format!("Failed to create {}: {e}", path.display()))
        })?;

        Ok(Self {
            path,
            writer: Mutex::new(Some(writer)),
            sample_rate,
        })
    }

    /// Finalize the WAV header. Later writes are dropped.
    pub fn finish(&self) -> CallResult<()> {
        if let Some(writer) = self.writer.lock().take() {
            writer.finalize().map_err(|e| {
                CallError::DeviceError(format!("Failed to finalize {}: {e}", self.path.display()))
            })?;
            info!("Recording saved to {}", self.path.display());
        }
        Ok(())
    }
}

impl PlaybackSink for WavRecorder {
    fn write(&self, samples: &[i16], sample_rate: u32) {
        let resampled;
        let samples = if sample_rate == self.sample_rate {
            samples
        } else {
            resampled = resample_linear(samples, sample_rate, self.sample_rate);
            &resampled
        };

        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return;
        };
        for &sample in samples {
            if let Err(e) = writer.write_sample(sample) {
                warn!("Dropping remote audio, write failed: {}", e);
                *guard = None;
                return;
            }
        }
    }

    fn flush(&self) {
        if let Some(writer) = self.writer.lock().as_mut()
            && let Err(e) = writer.flush()
        {
            warn!("Failed to flush recording: {}", e);
        }
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("{}", e);
        }
    }
}

// =============================================================================
// Sample Conversion
// =============================================================================

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Compand one PCM16 sample to G.711 u-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Expand one G.711 u-law byte to PCM16.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let value = !byte;
    let sign = value & 0x80;
    let exponent = ((value >> 4) & 0x07) as i32;
    let mantissa = (value & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Average interleaved channels into mono.
pub fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Linear-interpolation resampler.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let value = samples[idx] as f64 * (1.0 - frac) + samples[next] as f64 * frac;
            value.round() as i16
        })
        .collect()
}
