//! One recording/recognition cycle with silence endpointing

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::capture::{AudioSource, AudioStream, MicOwner, Microphone};
use super::stt::{RecognitionEvent, RecognitionPipeline, SpeechRecognizer};
use crate::Result;
use crate::timer::SilenceTimer;

/// How a capture cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Space-joined final fragments; never empty
    Transcript(String),
    /// Nothing was recognized before the silence timeout
    NoSpeech,
}

/// Produces one utterance per call
#[async_trait]
pub trait UtteranceCapture: Send + Sync {
    /// Record and transcribe one utterance
    ///
    /// Returns `Ok(None)` without touching the microphone when another
    /// capture is already running.
    ///
    /// # Errors
    ///
    /// Returns `MicrophoneDenied`/`MicrophoneBusy`/`Audio` if the microphone
    /// cannot be opened, or the recognizer's error if recognition fails.
    async fn capture(&self) -> Result<Option<CaptureOutcome>>;

    /// Finalize the running capture early, keeping what was recognized
    fn stop(&self) {}
}

/// Records one utterance at a time
///
/// Each [`capture`](UtteranceCapture::capture) call acquires the microphone, streams
/// audio into the recognizer and finalizes once no fragment has arrived for
/// the configured silence period. The microphone and the recognition
/// pipeline are released on every exit path.
pub struct SpeechCaptureSession {
    microphone: Microphone,
    audio: Arc<dyn AudioSource>,
    recognizer: Arc<dyn SpeechRecognizer>,
    silence: Duration,
    active: AtomicBool,
    stop: Notify,
}

/// Clears the active flag when a capture ends
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SpeechCaptureSession {
    pub fn new(
        microphone: Microphone,
        audio: Arc<dyn AudioSource>,
        recognizer: Arc<dyn SpeechRecognizer>,
        silence: Duration,
    ) -> Self {
        Self {
            microphone,
            audio,
            recognizer,
            silence,
            active: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    /// Whether a capture is in progress
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UtteranceCapture for SpeechCaptureSession {
    fn stop(&self) {
        self.stop.notify_waiters();
    }

    async fn capture(&self) -> Result<Option<CaptureOutcome>> {
        if self.active.swap(true, Ordering::SeqCst) {
            tracing::debug!("capture already active, ignoring");
            return Ok(None);
        }
        let _active = ActiveGuard(&self.active);

        let stopped = self.stop.notified();
        tokio::pin!(stopped);

        let lease = self.microphone.acquire(MicOwner::Capture)?;
        let mut audio = self.audio.open(lease)?;
        let mut pipeline = self.recognizer.start()?;

        tracing::debug!(silence = ?self.silence, "capture started");

        let mut transcript = Vec::<String>::new();
        let mut timer = SilenceTimer::start(self.silence);

        let ended: Result<&'static str> = loop {
            tokio::select! {
                biased;

                () = &mut stopped => break Ok("stopped"),
                event = pipeline.next_event() => match event {
                    Some(Ok(RecognitionEvent::Partial(_))) => timer.restart(),
                    Some(Ok(RecognitionEvent::Final(text))) => {
                        let text = text.trim();
                        if !text.is_empty() {
                            tracing::debug!(fragment = %text, "final fragment");
                            transcript.push(text.to_string());
                        }
                        timer.restart();
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok("recognizer finished"),
                },
                frame = audio.next_frame() => match frame {
                    Some(frame) => pipeline.push(frame),
                    None => break Ok("audio stream ended"),
                },
                () = timer.expired() => break Ok("silence"),
            }
        };

        release(pipeline, audio);

        let reason = ended?;
        let text = transcript.join(" ");
        tracing::debug!(reason, chars = text.len(), "capture finalized");

        if text.is_empty() {
            Ok(Some(CaptureOutcome::NoSpeech))
        } else {
            Ok(Some(CaptureOutcome::Transcript(text)))
        }
    }
}

/// Stop recognition first, then close the device and release the microphone
fn release(mut pipeline: RecognitionPipeline, audio: AudioStream) {
    pipeline.stop();
    drop(pipeline);
    drop(audio);
}
