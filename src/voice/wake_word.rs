//! Wake word detection
//!
//! [`WakeWordDetector`] owns the listening lifecycle (initialize, arm,
//! disarm, destroy) and fans debounced detections out to subscribers.
//! Spotting itself sits behind [`KeywordSpotter`]; the bundled
//! [`PhraseSpotter`] uses a hybrid approach: local energy detection plus
//! cloud verification of the trigger phrase.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::capture::{AudioHandle, AudioSource, MicOwner, Microphone, samples_to_wav};
use super::stt::SpeechToText;
use super::vad::{Activity, SegmenterSettings, SpeechSegmenter};
use crate::config::{SAMPLE_RATE, SttConfig, WakeWordConfig};
use crate::timer::QuietPeriod;
use crate::{Error, Result};

/// Detector lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeWordStatus {
    /// Not listening (uninitialized, initialized but disarmed, or destroyed)
    Idle,
    /// Loading the spotter
    Initializing,
    /// Consuming the microphone stream
    Armed,
    /// Arming failed or the stream died; arming may be retried
    Error,
    /// Credentials or assets are missing; arming is refused
    Disabled,
}

impl fmt::Display for WakeWordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Armed => "armed",
            Self::Error => "error",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// One accepted detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeWordDetection {
    /// Trigger phrase that matched
    pub keyword: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// Finds the trigger phrase in 16 kHz mono audio
#[async_trait]
pub trait KeywordSpotter: Send {
    /// Feed one frame; returns the matched keyword when one completes
    async fn process(&mut self, samples: &[f32]) -> Result<Option<String>>;

    /// Drop buffered audio before a new listening session
    fn reset(&mut self) {}
}

/// Builds a spotter from credentials and assets
#[async_trait]
pub trait SpotterBackend: Send + Sync {
    /// Validate assets and construct the spotter
    ///
    /// # Errors
    ///
    /// Returns `WakeWordAssets` when credentials or asset files are missing
    /// or invalid
    async fn load(&self, config: &WakeWordConfig) -> Result<Box<dyn KeywordSpotter>>;
}

type DetectionCallback = Arc<dyn Fn(&WakeWordDetection) + Send + Sync>;
type InitOutcome = std::result::Result<(), String>;
type SharedInit = Shared<BoxFuture<'static, InitOutcome>>;
type SharedSpotter = Arc<tokio::sync::Mutex<Box<dyn KeywordSpotter>>>;

/// Running microphone consumer
struct Listener {
    task: JoinHandle<()>,
    _device: AudioHandle,
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct State {
    status: WakeWordStatus,
    message: String,
    spotter: Option<SharedSpotter>,
    listener: Option<Listener>,
    debounce: QuietPeriod,
    subscribers: Vec<(u64, DetectionCallback)>,
    next_subscriber: u64,
    /// A device is being opened by `arm`
    opening: bool,
    /// Bumped on every arm/disarm; detections from older sessions are dropped
    generation: u64,
    /// Bumped on destroy; in-flight initializations from older epochs are discarded
    epoch: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide wake word detector
///
/// Construct one per process and share it by `Arc`. At most one listening
/// session consumes the microphone at a time: arming while armed is a no-op,
/// and disarming stops the device before returning.
pub struct WakeWordDetector {
    backend: Arc<dyn SpotterBackend>,
    audio: Arc<dyn AudioSource>,
    microphone: Microphone,
    init: Mutex<Option<SharedInit>>,
    state: Arc<Mutex<State>>,
}

impl WakeWordDetector {
    pub fn new(
        backend: Arc<dyn SpotterBackend>,
        audio: Arc<dyn AudioSource>,
        microphone: Microphone,
        debounce: Duration,
    ) -> Self {
        Self {
            backend,
            audio,
            microphone,
            init: Mutex::new(None),
            state: Arc::new(Mutex::new(State {
                status: WakeWordStatus::Idle,
                message: "not initialized".to_string(),
                spotter: None,
                listener: None,
                debounce: QuietPeriod::new(debounce),
                subscribers: Vec::new(),
                next_subscriber: 0,
                opening: false,
                generation: 0,
                epoch: 0,
            })),
        }
    }

    /// Load the spotter
    ///
    /// Memoized: concurrent and repeated callers share one setup and observe
    /// the same outcome. After a failure the detector stays disabled until
    /// [`destroy`](Self::destroy).
    ///
    /// # Errors
    ///
    /// Returns `WakeWordAssets` if credentials or assets are missing
    pub async fn initialize(&self, config: Arc<WakeWordConfig>) -> Result<()> {
        let init = {
            let mut slot = lock(&self.init);
            if let Some(init) = slot.as_ref() {
                init.clone()
            } else {
                let epoch = {
                    let mut state = lock(&self.state);
                    state.status = WakeWordStatus::Initializing;
                    state.message = "loading wake word engine".to_string();
                    state.debounce.set_period(config.debounce);
                    state.epoch
                };
                let init = load_spotter(
                    Arc::clone(&self.backend),
                    Arc::clone(&self.state),
                    config,
                    epoch,
                )
                .boxed()
                .shared();
                *slot = Some(init.clone());
                init
            }
        };

        init.await.map_err(Error::WakeWordAssets)
    }

    /// Start consuming the microphone
    ///
    /// # Errors
    ///
    /// Fails if the detector is uninitialized or disabled, or if the
    /// microphone cannot be opened
    pub fn arm(&self) -> Result<()> {
        let (spotter, generation, stale) = {
            let mut state = lock(&self.state);
            match state.status {
                WakeWordStatus::Armed => return Ok(()),
                WakeWordStatus::Disabled => {
                    return Err(Error::WakeWordAssets(state.message.clone()));
                }
                _ => {}
            }
            if state.opening {
                return Ok(());
            }
            let Some(spotter) = state.spotter.clone() else {
                return Err(Error::WakeWord("detector is not initialized".to_string()));
            };
            state.opening = true;
            state.generation += 1;
            // A listener whose stream died still holds the microphone
            (spotter, state.generation, state.listener.take())
        };
        drop(stale);

        // The device may take a while to start; the state stays unlocked
        let opened = self
            .microphone
            .acquire(MicOwner::WakeWord)
            .and_then(|lease| self.audio.open(lease));

        let mut state = lock(&self.state);
        state.opening = false;
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                state.status = WakeWordStatus::Error;
                state.message = e.to_string();
                tracing::warn!(error = %e, "failed to arm wake word detector");
                return Err(e);
            }
        };
        if state.generation != generation || state.spotter.is_none() {
            drop(state);
            drop(stream);
            tracing::debug!("disarmed while the device was opening");
            return Ok(());
        }
        let (frames, device) = stream.into_parts();

        let task = tokio::spawn(listen(
            frames,
            spotter,
            Arc::clone(&self.state),
            generation,
        ));
        state.listener = Some(Listener {
            task,
            _device: device,
        });
        state.status = WakeWordStatus::Armed;
        state.message = "listening for wake word".to_string();
        tracing::info!("wake word detector armed");
        Ok(())
    }

    /// Stop consuming the microphone; no-op unless armed
    ///
    /// The device is closed and the microphone released before this returns.
    /// A device still opening is closed as soon as it comes up.
    pub fn disarm(&self) {
        let listener = {
            let mut state = lock(&self.state);
            if state.listener.is_none() && !state.opening {
                return;
            }
            state.generation += 1;
            if state.status == WakeWordStatus::Armed {
                state.status = WakeWordStatus::Idle;
                state.message = "paused".to_string();
            }
            state.listener.take()
        };
        // Joins the device thread; done outside the lock
        drop(listener);
        tracing::debug!("wake word detector disarmed");
    }

    /// Tear down the engine, drop subscribers and forget initialization
    pub fn destroy(&self) {
        self.disarm();
        *lock(&self.init) = None;

        let mut state = lock(&self.state);
        state.epoch += 1;
        state.spotter = None;
        state.subscribers.clear();
        state.debounce.clear();
        state.status = WakeWordStatus::Idle;
        state.message = "not initialized".to_string();
        tracing::debug!("wake word detector destroyed");
    }

    /// Register a callback for accepted detections
    ///
    /// Callbacks run on the listening task and must not block.
    pub fn on_detection(
        &self,
        callback: impl Fn(&WakeWordDetection) + Send + Sync + 'static,
    ) -> DetectionSubscription {
        let mut state = lock(&self.state);
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.push((id, Arc::new(callback)));
        DetectionSubscription {
            id,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Change the debounce window
    pub fn set_debounce(&self, window: Duration) {
        lock(&self.state).debounce.set_period(window);
    }

    pub fn status(&self) -> WakeWordStatus {
        lock(&self.state).status
    }

    /// Human-readable status line
    pub fn status_message(&self) -> String {
        let state = lock(&self.state);
        format!("{}: {}", state.status, state.message)
    }

    pub fn is_armed(&self) -> bool {
        self.status() == WakeWordStatus::Armed
    }
}

impl Drop for WakeWordDetector {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Keeps a detection callback registered; unsubscribes on drop
#[must_use = "dropping the subscription unsubscribes the callback"]
pub struct DetectionSubscription {
    id: u64,
    state: Weak<Mutex<State>>,
}

impl DetectionSubscription {
    /// Remove the callback now
    pub fn unsubscribe(self) {}
}

impl Drop for DetectionSubscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            lock(&state).subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

async fn load_spotter(
    backend: Arc<dyn SpotterBackend>,
    state: Arc<Mutex<State>>,
    config: Arc<WakeWordConfig>,
    epoch: u64,
) -> InitOutcome {
    let loaded = backend.load(&config).await;

    let mut state = lock(&state);
    if state.epoch != epoch {
        return Err("detector was destroyed during initialization".to_string());
    }
    match loaded {
        Ok(spotter) => {
            state.spotter = Some(Arc::new(tokio::sync::Mutex::new(spotter)));
            state.status = WakeWordStatus::Idle;
            state.message = "ready".to_string();
            tracing::info!("wake word engine loaded");
            Ok(())
        }
        Err(e) => {
            let message = match e {
                Error::WakeWordAssets(message) => message,
                other => other.to_string(),
            };
            state.status = WakeWordStatus::Disabled;
            state.message.clone_from(&message);
            tracing::warn!(error = %message, "wake word disabled");
            Err(message)
        }
    }
}

async fn listen(
    mut frames: mpsc::Receiver<Vec<f32>>,
    spotter: SharedSpotter,
    state: Arc<Mutex<State>>,
    generation: u64,
) {
    let mut spotter = spotter.lock().await;
    spotter.reset();

    while let Some(frame) = frames.recv().await {
        match spotter.process(&frame).await {
            Ok(Some(keyword)) => deliver(&state, generation, keyword),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "wake word processing failed"),
        }
    }

    let mut state = lock(&state);
    if state.generation == generation && state.status == WakeWordStatus::Armed {
        state.status = WakeWordStatus::Error;
        state.message = "microphone stream ended".to_string();
        tracing::warn!("wake word audio stream ended");
    }
}

fn deliver(state: &Mutex<State>, generation: u64, keyword: String) {
    let callbacks: Vec<DetectionCallback> = {
        let mut state = lock(state);
        if state.generation != generation || state.status != WakeWordStatus::Armed {
            tracing::trace!(keyword, "stale detection dropped");
            return;
        }
        if !state.debounce.accept(Instant::now()) {
            tracing::debug!(keyword, "detection within debounce window, ignored");
            return;
        }
        state.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    };

    let detection = WakeWordDetection {
        keyword,
        timestamp: chrono::Utc::now().timestamp_millis(),
    };
    tracing::info!(
        keyword = %detection.keyword,
        subscribers = callbacks.len(),
        "wake word detected"
    );
    for callback in callbacks {
        callback(&detection);
    }
}

/// Loads [`PhraseSpotter`]s from a phrase file and a segmenter tuning file
///
/// The access key authenticates the transcription service that verifies
/// candidate segments.
pub struct PhraseSpotterBackend {
    base_url: String,
    model: String,
}

impl PhraseSpotterBackend {
    pub fn new(stt: &SttConfig) -> Self {
        Self {
            base_url: stt.base_url.clone(),
            model: stt.model.clone(),
        }
    }
}

#[async_trait]
impl SpotterBackend for PhraseSpotterBackend {
    async fn load(&self, config: &WakeWordConfig) -> Result<Box<dyn KeywordSpotter>> {
        let access_key = config.access_key.as_ref().ok_or_else(|| {
            Error::WakeWordAssets("missing access key (set GITTY_WAKE_ACCESS_KEY)".to_string())
        })?;

        let phrases = tokio::fs::read_to_string(&config.keyword_path)
            .await
            .map_err(|_| {
                Error::WakeWordAssets(format!(
                    "missing keyword file at {}",
                    config.keyword_path.display()
                ))
            })?;
        let phrases = parse_phrases(&phrases);
        if phrases.is_empty() {
            return Err(Error::WakeWordAssets(format!(
                "no trigger phrases in {}",
                config.keyword_path.display()
            )));
        }

        let model = tokio::fs::read_to_string(&config.model_path)
            .await
            .map_err(|_| {
                Error::WakeWordAssets(format!(
                    "missing model file at {}",
                    config.model_path.display()
                ))
            })?;
        let settings = spotter_settings(&model, config.sensitivity).map_err(|e| {
            Error::WakeWordAssets(format!(
                "invalid model file {}: {e}",
                config.model_path.display()
            ))
        })?;

        let stt = SpeechToText::new(
            SecretString::from(access_key.expose_secret().to_string()),
            &self.base_url,
            &self.model,
        )
        .map_err(|e| Error::WakeWordAssets(e.to_string()))?;

        tracing::debug!(
            phrases = ?phrases,
            energy_threshold = settings.energy_threshold,
            "wake word spotter loaded"
        );

        Ok(Box::new(PhraseSpotter {
            segmenter: SpeechSegmenter::new(settings),
            phrases,
            stt,
        }))
    }
}

/// Parse a spotter tuning file and apply the sensitivity
fn spotter_settings(model: &str, sensitivity: f32) -> Result<SegmenterSettings> {
    let mut settings: SegmenterSettings = toml::from_str(model)?;
    // Higher sensitivity lowers the energy needed to open a segment
    settings.energy_threshold *= 1.5 - sensitivity;
    Ok(settings)
}

/// Segments speech locally and verifies each segment by transcription
pub struct PhraseSpotter {
    segmenter: SpeechSegmenter,
    phrases: Vec<String>,
    stt: SpeechToText,
}

#[async_trait]
impl KeywordSpotter for PhraseSpotter {
    async fn process(&mut self, samples: &[f32]) -> Result<Option<String>> {
        let Activity::Complete(segment) = self.segmenter.process(samples) else {
            return Ok(None);
        };
        let wav = samples_to_wav(&segment, SAMPLE_RATE)?;
        let transcript = self.stt.transcribe(&wav).await?;
        Ok(match_phrase(&self.phrases, &transcript))
    }

    fn reset(&mut self) {
        self.segmenter.reset();
    }
}

/// One normalized phrase per non-empty, non-comment line
fn parse_phrases(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(normalize)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Lowercase, punctuation stripped, whitespace collapsed
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First configured phrase contained in the transcript
fn match_phrase(phrases: &[String], transcript: &str) -> Option<String> {
    let normalized = normalize(transcript);
    phrases
        .iter()
        .find(|phrase| normalized.contains(phrase.as_str()))
        .cloned()
}
