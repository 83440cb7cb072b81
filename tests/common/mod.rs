//! Shared test utilities
//!
//! Scripted stand-ins for every external boundary of the pipeline: the
//! microphone device, the streaming recognizer, the keyword spotter, the
//! inference service, git queries and git execution.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use gitty::config::WakeWordConfig;
use gitty::exec::{CommandExecutor, ExecOutput, OutputChunk};
use gitty::inference::{CommandInference, CommandProposal};
use gitty::repo::{GitQuery, RepoSnapshot};
use gitty::voice::{
    AudioSource, AudioStream, CaptureOutcome, KeywordSpotter, MicLease, RecognitionEvent,
    RecognitionPipeline, SpeechRecognizer, SpotterBackend, UtteranceCapture,
};
use gitty::{Error, Result};

/// Keyword reported by [`ThresholdSpotter`]
pub const KEYWORD: &str = "hey gitty";

/// Frame that [`ThresholdSpotter`] recognizes as the wake word
#[must_use]
pub fn trigger_frame() -> Vec<f32> {
    vec![0.9; 160]
}

/// Increments a counter when dropped
pub struct DropCounter(pub Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Audio source whose frames are pushed by the test
#[derive(Default)]
pub struct ScriptedAudio {
    pub opened: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    deny: bool,
    sender: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    on_open: Mutex<Option<OpenHook>>,
}

type OpenHook = Arc<dyn Fn() + Send + Sync>;

impl ScriptedAudio {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that refuses to open, like a device without permission
    #[must_use]
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Run `hook` inside every `open`, before the stream exists
    pub fn set_on_open(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_open.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Deliver a frame to the most recently opened stream
    pub async fn send(&self, frame: Vec<f32>) {
        let sender = self.sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(frame).await;
        }
    }
}

impl AudioSource for ScriptedAudio {
    fn open(&self, lease: MicLease) -> Result<AudioStream> {
        if self.deny {
            return Err(Error::MicrophoneDenied("access to the microphone was denied".to_string()));
        }
        let hook = self.on_open.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook();
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(AudioStream::new(
            rx,
            DropCounter(Arc::clone(&self.released)),
            lease,
        ))
    }
}

/// Recognizer that replays timed events and then stays open
pub struct ScriptedRecognizer {
    script: Vec<(Duration, RecognitionEvent)>,
    pub started: AtomicUsize,
    pub stopped: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    /// Events at absolute offsets from the start of recognition
    #[must_use]
    pub fn new(script: Vec<(Duration, RecognitionEvent)>) -> Self {
        Self {
            script,
            started: AtomicUsize::new(0),
            stopped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Final fragments at the given millisecond offsets
    #[must_use]
    pub fn finals(fragments: &[(u64, &str)]) -> Self {
        Self::new(
            fragments
                .iter()
                .map(|(ms, text)| {
                    (
                        Duration::from_millis(*ms),
                        RecognitionEvent::Final((*text).to_string()),
                    )
                })
                .collect(),
        )
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn start(&self) -> Result<RecognitionPipeline> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let (audio_tx, _audio_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let script = self.script.clone();
        let stopped = DropCounter(Arc::clone(&self.stopped));

        let task = tokio::spawn(async move {
            let _stopped = stopped;
            let start = tokio::time::Instant::now();
            for (at, event) in script {
                tokio::time::sleep_until(start + at).await;
                if event_tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        });

        Ok(RecognitionPipeline::new(audio_tx, event_rx, task))
    }
}

/// Reports [`KEYWORD`] for any frame whose first sample exceeds 0.5
pub struct ThresholdSpotter;

#[async_trait]
impl KeywordSpotter for ThresholdSpotter {
    async fn process(&mut self, samples: &[f32]) -> Result<Option<String>> {
        Ok(samples
            .first()
            .filter(|s| **s > 0.5)
            .map(|_| KEYWORD.to_string()))
    }
}

/// Backend counting loads; optionally fails like a missing model file
#[derive(Default)]
pub struct ScriptedBackend {
    pub loads: AtomicUsize,
    fail: bool,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpotterBackend for ScriptedBackend {
    async fn load(&self, _config: &WakeWordConfig) -> Result<Box<dyn KeywordSpotter>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail {
            return Err(Error::WakeWordAssets("missing model file at /nowhere".to_string()));
        }
        Ok(Box::new(ThresholdSpotter))
    }
}

/// Wake word configuration pointing nowhere; scripted backends ignore it
#[must_use]
pub fn wake_word_config(debounce: Duration) -> WakeWordConfig {
    WakeWordConfig {
        enabled: true,
        access_key: None,
        keyword_path: "/nonexistent/hey_gitty.txt".into(),
        model_path: "/nonexistent/spotter.toml".into(),
        sensitivity: 0.7,
        debounce,
    }
}

/// Capture returning a fixed outcome
pub struct FixedCapture {
    outcome: std::result::Result<Option<CaptureOutcome>, String>,
    pub calls: AtomicUsize,
}

impl FixedCapture {
    #[must_use]
    pub fn transcript(text: &str) -> Self {
        Self {
            outcome: Ok(Some(CaptureOutcome::Transcript(text.to_string()))),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn no_speech() -> Self {
        Self {
            outcome: Ok(Some(CaptureOutcome::NoSpeech)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Capture failing with a microphone permission error
    #[must_use]
    pub fn denied() -> Self {
        Self {
            outcome: Err("access to the microphone was denied".to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UtteranceCapture for FixedCapture {
    async fn capture(&self) -> Result<Option<CaptureOutcome>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .clone()
            .map_err(Error::MicrophoneDenied)
    }
}

/// Inference returning a fixed reply and recording its inputs
pub struct ScriptedInference {
    reply: std::result::Result<Value, String>,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<(String, RepoSnapshot, Vec<String>)>>,
}

impl ScriptedInference {
    /// Reply decoded with the same validation as the real client
    #[must_use]
    pub fn reply(value: Value) -> Self {
        Self {
            reply: Ok(value),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Fail like an unreachable service
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandInference for ScriptedInference {
    async fn infer(
        &self,
        utterance: &str,
        snapshot: &RepoSnapshot,
        history: &[String],
        _learning_mode: bool,
    ) -> Result<CommandProposal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((
            utterance.to_string(),
            snapshot.clone(),
            history.to_vec(),
        ));
        match &self.reply {
            Ok(value) => CommandProposal::from_value(value),
            Err(message) => Err(Error::Inference(message.clone())),
        }
    }
}

/// Executor recording argument vectors and echoing a stdout chunk
#[derive(Default)]
pub struct RecordingExecutor {
    pub runs: Mutex<Vec<Vec<String>>>,
}

impl RecordingExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<Vec<String>> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn exec(
        &self,
        args: &[String],
        _cwd: Option<&Path>,
        output: Option<&mpsc::UnboundedSender<OutputChunk>>,
    ) -> Result<ExecOutput> {
        self.runs.lock().unwrap().push(args.to_vec());
        let stdout = format!("ran {}\n", args.join(" "));
        if let Some(output) = output {
            let _ = output.send(OutputChunk::Stdout(stdout.clone()));
        }
        Ok(ExecOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

/// Scripted git: maps a space-joined argument line to its output
#[derive(Default)]
pub struct FakeGit {
    outputs: HashMap<String, String>,
}

impl FakeGit {
    /// A work tree on `branch` with the given porcelain status
    #[must_use]
    pub fn repo(branch: &str, porcelain: &str) -> Self {
        Self::default()
            .with("rev-parse --is-inside-work-tree", "true")
            .with("rev-parse --abbrev-ref HEAD", branch)
            .with("status --porcelain", porcelain)
    }

    /// A directory outside any work tree
    #[must_use]
    pub fn outside() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, args: &str, output: &str) -> Self {
        self.outputs.insert(args.to_string(), output.to_string());
        self
    }
}

#[async_trait]
impl GitQuery for FakeGit {
    async fn query(&self, args: &[&str], _cwd: Option<&Path>) -> Option<String> {
        self.outputs.get(&args.join(" ")).cloned()
    }
}
