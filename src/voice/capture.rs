//! Audio capture from microphone
//!
//! The microphone is exclusively owned: a [`MicLease`] must be held to open a
//! stream, and only one lease exists at a time. Dropping an [`AudioStream`]
//! stops the device before the lease is released.

use std::fmt;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::runtime::RuntimeFlavor;
use tokio::sync::mpsc;

use crate::config::SAMPLE_RATE;
use crate::{Error, Result};

/// Frames buffered between the device callback and the consumer
const FRAME_BUFFER: usize = 512;

/// How long to wait for the device thread to report stream startup
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Component currently holding the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicOwner {
    /// Wake word detector listening for the trigger phrase
    WakeWord,
    /// Speech capture session recording an utterance
    Capture,
    /// Diagnostics (mic test)
    Diagnostics,
}

impl fmt::Display for MicOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WakeWord => write!(f, "wake word detector"),
            Self::Capture => write!(f, "speech capture"),
            Self::Diagnostics => write!(f, "diagnostics"),
        }
    }
}

/// Arbiter for exclusive microphone ownership
#[derive(Debug, Clone, Default)]
pub struct Microphone {
    holder: Arc<Mutex<Option<MicOwner>>>,
}

impl Microphone {
    /// Create an unowned microphone
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive ownership
    ///
    /// # Errors
    ///
    /// Returns `MicrophoneBusy` if another component holds the microphone
    pub fn acquire(&self, owner: MicOwner) -> Result<MicLease> {
        let mut holder = self
            .holder
            .lock()
            .map_err(|_| Error::Audio("microphone state poisoned".to_string()))?;
        if let Some(current) = *holder {
            return Err(Error::MicrophoneBusy(current.to_string()));
        }
        *holder = Some(owner);
        tracing::trace!(%owner, "microphone acquired");
        Ok(MicLease {
            owner,
            holder: Arc::clone(&self.holder),
        })
    }

    /// Current holder, if any
    #[must_use]
    pub fn holder(&self) -> Option<MicOwner> {
        self.holder.lock().ok().and_then(|h| *h)
    }
}

/// Proof of exclusive microphone ownership; released on drop
#[derive(Debug)]
pub struct MicLease {
    owner: MicOwner,
    holder: Arc<Mutex<Option<MicOwner>>>,
}

impl MicLease {
    /// Owner of this lease
    #[must_use]
    pub const fn owner(&self) -> MicOwner {
        self.owner
    }
}

impl Drop for MicLease {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.holder.lock() {
            *holder = None;
        }
        tracing::trace!(owner = %self.owner, "microphone released");
    }
}

/// Keeps an open input device alive; stops it on drop
pub trait DeviceGuard: Send {}

impl<T: Send> DeviceGuard for T {}

/// Open microphone stream delivering 16 kHz mono frames
pub struct AudioStream {
    frames: mpsc::Receiver<Vec<f32>>,
    device: AudioHandle,
}

/// Device and lease half of an [`AudioStream`]
///
/// Dropping it stops the device first, then releases the microphone.
pub struct AudioHandle {
    guard: Option<Box<dyn DeviceGuard>>,
    lease: Option<MicLease>,
}

impl Drop for AudioHandle {
    fn drop(&mut self) {
        drop(self.guard.take());
        drop(self.lease.take());
    }
}

impl AudioStream {
    /// Wrap a frame channel, the guard keeping its device open, and the lease
    #[must_use]
    pub fn new(
        frames: mpsc::Receiver<Vec<f32>>,
        guard: impl DeviceGuard + 'static,
        lease: MicLease,
    ) -> Self {
        Self {
            frames,
            device: AudioHandle {
                guard: Some(Box::new(guard)),
                lease: Some(lease),
            },
        }
    }

    /// Next captured frame; `None` once the device stops
    pub async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.recv().await
    }

    /// Split into the frame receiver and the device handle
    ///
    /// Lets a consumer task own the frames while the owner keeps the handle
    /// and can stop the device synchronously.
    #[must_use]
    pub fn into_parts(self) -> (mpsc::Receiver<Vec<f32>>, AudioHandle) {
        (self.frames, self.device)
    }
}

/// Opens microphone streams
pub trait AudioSource: Send + Sync {
    /// Open the input device under the given lease
    ///
    /// # Errors
    ///
    /// Returns `MicrophoneDenied` if access is refused, `Audio` for other
    /// device failures
    fn open(&self, lease: MicLease) -> Result<AudioStream>;
}

/// Captures audio from the default input device
///
/// cpal streams aren't `Send`, so each stream lives on its own thread and
/// forwards frames over a channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalSource;

impl CpalSource {
    /// Create a source for the default input device
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Stops the device thread when dropped
struct CpalGuard {
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for CpalGuard {
    fn drop(&mut self) {
        // Closing the channel wakes the device thread, which drops the stream
        drop(self.stop.take());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("audio device thread panicked");
        }
    }
}

impl AudioSource for CpalSource {
    fn open(&self, lease: MicLease) -> Result<AudioStream> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("gitty-mic".to_string())
            .spawn(move || {
                let stream = match build_input_stream(frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(classify_device_error(&e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Blocks until the guard drops its sender
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        let guard = CpalGuard {
            stop: Some(stop_tx),
            thread: Some(thread),
        };

        match blocking(|| ready_rx.recv_timeout(OPEN_TIMEOUT)) {
            Ok(Ok(())) => {
                tracing::debug!(owner = %lease.owner(), "audio capture started");
                Ok(AudioStream::new(frame_rx, guard, lease))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Audio("audio device did not start".to_string())),
        }
    }
}

/// Wait on the device thread without stalling other tasks on this worker
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn build_input_stream(frame_tx: mpsc::Sender<Vec<f32>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    // Prefer a native 16 kHz mono config, else convert from the default
    let native = device
        .supported_input_configs()
        .map_err(|e| classify_device_error(&e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .map(|c| c.with_sample_rate(SampleRate(SAMPLE_RATE)).config());

    let config: StreamConfig = match native {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| classify_device_error(&e.to_string()))?
            .config(),
    };

    let channels = config.channels;
    let rate = config.sample_rate.0;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = rate,
        channels,
        "audio capture initialized"
    );

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = if channels > 1 {
                    to_mono(data, channels)
                } else {
                    data.to_vec()
                };
                let frame = downsample(&mono, rate, SAMPLE_RATE);
                // Never block the device callback
                if frame_tx.try_send(frame).is_err() {
                    tracing::trace!("audio channel full, dropping frame");
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| classify_device_error(&e.to_string()))
}

/// Map a device error message onto the permission/device taxonomy
#[must_use]
pub fn classify_device_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        Error::MicrophoneDenied(message.to_string())
    } else {
        Error::Audio(message.to_string())
    }
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = usize::from(channels);
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler; adequate for speech bandwidth
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
    }

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let mic = Microphone::new();
        let lease = mic.acquire(MicOwner::WakeWord).unwrap();
        assert_eq!(mic.holder(), Some(MicOwner::WakeWord));

        let err = mic.acquire(MicOwner::Capture).unwrap_err();
        assert!(matches!(err, Error::MicrophoneBusy(_)));

        drop(lease);
        assert_eq!(mic.holder(), None);
        assert!(mic.acquire(MicOwner::Capture).is_ok());
    }

    #[test]
    fn dropping_stream_releases_lease() {
        let mic = Microphone::new();
        let (_tx, rx) = mpsc::channel(1);
        let stream = AudioStream::new(rx, (), mic.acquire(MicOwner::Capture).unwrap());
        assert!(mic.holder().is_some());
        drop(stream);
        assert!(mic.holder().is_none());
    }

    #[test]
    fn classifies_permission_errors() {
        assert!(matches!(
            classify_device_error("Permission denied by user"),
            Error::MicrophoneDenied(_)
        ));
        assert!(matches!(
            classify_device_error("device unplugged"),
            Error::Audio(_)
        ));
    }

    #[test]
    fn downmixes_and_resamples() {
        let stereo = [0.2, 0.4, 0.6, 0.8];
        assert_eq!(to_mono(&stereo, 2), vec![0.3, 0.7]);

        let input = vec![0.5f32; 48_000];
        let out = downsample(&input, 48_000, SAMPLE_RATE);
        assert_eq!(out.len(), 16_000);
    }
}
