//! Speech-to-text (STT) processing
//!
//! [`SpeechToText`] uploads one WAV segment to an OpenAI-compatible
//! transcription endpoint. [`WhisperRecognizer`] turns that into a streaming
//! recognizer: frames are segmented locally, each segment is transcribed, and
//! interim [`RecognitionEvent::Partial`] events signal that speech is ongoing.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::capture::samples_to_wav;
use super::vad::{Activity, SegmenterSettings, SpeechSegmenter};
use crate::config::{SAMPLE_RATE, SttConfig};
use crate::{Error, Result};

/// Interval between keepalive partials while a segment is being transcribed
const PENDING_PARTIAL_INTERVAL: Duration = Duration::from_millis(500);

/// Response from the Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl SpeechToText {
    /// Create a Whisper-compatible transcriber
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, base_url: &str, model: &str) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Stt("transcription API key is empty".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Create a transcriber from configuration
    ///
    /// # Errors
    ///
    /// Returns `Config` if no API key is configured
    pub fn from_config(config: &SttConfig) -> Result<Self> {
        let key = config
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not configured".to_string()))?;
        Self::new(
            SecretString::from(key.expose_secret().to_string()),
            &config.base_url,
            &config.model,
        )
    }

    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the service rejects it
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                Error::Stt(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            Error::Stt(e.to_string())
        })?;

        let text = result.text.trim().to_string();
        tracing::debug!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

/// Output of a streaming recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Interim hypothesis; speech is still ongoing
    Partial(String),
    /// Finalized fragment of the transcript
    Final(String),
}

/// A running recognition pipeline
///
/// Frames go in through [`push`](Self::push); events come out through
/// [`next_event`](Self::next_event). Dropping the pipeline stops it.
pub struct RecognitionPipeline {
    audio: mpsc::Sender<Vec<f32>>,
    events: mpsc::Receiver<Result<RecognitionEvent>>,
    task: Option<JoinHandle<()>>,
}

impl RecognitionPipeline {
    /// Wrap the channels of a recognition task
    #[must_use]
    pub fn new(
        audio: mpsc::Sender<Vec<f32>>,
        events: mpsc::Receiver<Result<RecognitionEvent>>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            audio,
            events,
            task: Some(task),
        }
    }

    /// Forward one audio frame; dropped if the recognizer is backed up
    pub fn push(&self, frame: Vec<f32>) {
        if self.audio.try_send(frame).is_err() {
            tracing::trace!("recognizer backed up, dropping frame");
        }
    }

    /// Next recognition event; `None` once the recognizer has finished
    pub async fn next_event(&mut self) -> Option<Result<RecognitionEvent>> {
        self.events.recv().await
    }

    /// Stop the recognition task
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events.close();
    }
}

impl Drop for RecognitionPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts streaming speech recognition
pub trait SpeechRecognizer: Send + Sync {
    /// Spawn a recognition pipeline fed with 16 kHz mono frames
    ///
    /// # Errors
    ///
    /// Returns `Stt` if the recognizer cannot start
    fn start(&self) -> Result<RecognitionPipeline>;
}

/// Streaming recognizer over a segment-at-a-time transcription API
pub struct WhisperRecognizer {
    stt: Arc<SpeechToText>,
    settings: SegmenterSettings,
}

impl WhisperRecognizer {
    #[must_use]
    pub fn new(stt: Arc<SpeechToText>) -> Self {
        Self {
            stt,
            settings: SegmenterSettings::default(),
        }
    }

    /// Override segmentation thresholds
    #[must_use]
    pub fn with_settings(mut self, settings: SegmenterSettings) -> Self {
        self.settings = settings;
        self
    }
}

impl SpeechRecognizer for WhisperRecognizer {
    fn start(&self) -> Result<RecognitionPipeline> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<f32>>(1024);
        let (event_tx, event_rx) = mpsc::channel(64);
        let stt = Arc::clone(&self.stt);
        let mut segmenter = SpeechSegmenter::new(self.settings);

        let task = tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                match segmenter.process(&frame) {
                    Activity::Speech => {
                        // Receiver gone means the session ended
                        if event_tx
                            .send(Ok(RecognitionEvent::Partial(String::new())))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Activity::Silence => {}
                    Activity::Complete(samples) => {
                        let outcome = transcribe_segment(&stt, &samples, &event_tx).await;
                        let event = match outcome {
                            Ok(text) if text.is_empty() => continue,
                            Ok(text) => Ok(RecognitionEvent::Final(text)),
                            Err(e) => Err(e),
                        };
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
            tracing::debug!("recognizer input closed");
        });

        Ok(RecognitionPipeline::new(audio_tx, event_rx, task))
    }
}

/// Transcribe one segment, emitting keepalive partials while waiting
async fn transcribe_segment(
    stt: &SpeechToText,
    samples: &[f32],
    events: &mpsc::Sender<Result<RecognitionEvent>>,
) -> Result<String> {
    let wav = samples_to_wav(samples, SAMPLE_RATE)?;
    let request = stt.transcribe(&wav);
    tokio::pin!(request);

    let mut keepalive = tokio::time::interval(PENDING_PARTIAL_INTERVAL);
    loop {
        tokio::select! {
            result = &mut request => return result,
            _ = keepalive.tick() => {
                let _ = events.send(Ok(RecognitionEvent::Partial(String::new()))).await;
            }
        }
    }
}
