//! Daemon - the interactive voice session
//!
//! Wires the microphone, wake word detector, capture session, repository
//! probe, inference client and git executor into one
//! [`PipelineOrchestrator`], then feeds it triggers and confirmation keys
//! from the terminal until the user quits.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::{CaptureConfig, LlmConfig, SessionConfig, SttConfig, WakeWordConfig};
use crate::confirm::Decision;
use crate::exec::{GitExecutor, OutputChunk};
use crate::inference::CommandInferenceClient;
use crate::pipeline::{CycleOutcome, Phase, PipelineEvent, PipelineOrchestrator, Trigger};
use crate::repo::RepositoryProbe;
use crate::voice::{
    CpalSource, Microphone, PhraseSpotterBackend, SpeechCaptureSession, SpeechToText,
    UtteranceCapture, WakeWordDetector, WhisperRecognizer,
};
use crate::{Config, Result};

/// The Gitty daemon - owns configuration for one interactive session
pub struct Daemon {
    llm: LlmConfig,
    stt: SttConfig,
    wake_word: Arc<WakeWordConfig>,
    capture: CaptureConfig,
    session: SessionConfig,
    cwd: Option<PathBuf>,
}

/// Everything one session needs, built once
struct Components {
    orchestrator: Arc<PipelineOrchestrator>,
    capture: Arc<SpeechCaptureSession>,
    detector: Option<Arc<WakeWordDetector>>,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
}

/// What a line typed at the prompt means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    /// Empty line
    Enter,
    Decision(Decision),
    Quit,
    Other,
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Enter;
        }
        if line.eq_ignore_ascii_case("q") || line.eq_ignore_ascii_case("quit") {
            return Self::Quit;
        }
        Decision::from_input(line).map_or(Self::Other, Self::Decision)
    }
}

impl Daemon {
    /// Create a daemon for `cwd` (or the process directory)
    #[must_use]
    pub fn new(config: Config, cwd: Option<PathBuf>) -> Self {
        let Config {
            llm,
            stt,
            wake_word,
            capture,
            session,
        } = config;
        Self {
            llm,
            stt,
            wake_word: Arc::new(wake_word),
            capture,
            session,
            cwd,
        }
    }

    fn build(&self, with_wake_word: bool) -> Result<Components> {
        let microphone = Microphone::new();
        let audio = Arc::new(CpalSource::new());

        let stt = Arc::new(SpeechToText::from_config(&self.stt)?);
        let recognizer = Arc::new(WhisperRecognizer::new(stt));
        let capture = Arc::new(SpeechCaptureSession::new(
            microphone.clone(),
            audio.clone(),
            recognizer,
            self.capture.silence,
        ));

        let inference = Arc::new(CommandInferenceClient::new(&self.llm)?);
        let (events_tx, events) = mpsc::unbounded_channel();

        let mut orchestrator = PipelineOrchestrator::new(
            capture.clone(),
            RepositoryProbe::system(),
            inference,
            Arc::new(GitExecutor::new()),
            events_tx,
        )
        .with_session(self.session);
        if let Some(cwd) = &self.cwd {
            orchestrator = orchestrator.with_cwd(cwd.clone());
        }

        let detector = with_wake_word.then(|| {
            Arc::new(WakeWordDetector::new(
                Arc::new(PhraseSpotterBackend::new(&self.stt)),
                audio,
                microphone,
                self.wake_word.debounce,
            ))
        });
        if let Some(detector) = &detector {
            orchestrator = orchestrator.with_wake_word(Arc::clone(detector));
        }

        Ok(Components {
            orchestrator: Arc::new(orchestrator),
            capture,
            detector,
            events,
        })
    }

    /// Run the interactive session until `q` or Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer or inference client cannot be built
    pub async fn run(&self, wake_word: bool) -> Result<()> {
        let Components {
            orchestrator,
            capture,
            detector,
            events,
        } = self.build(wake_word && self.wake_word.enabled)?;

        let printer = tokio::spawn(print_events(events));
        let (trigger_tx, mut triggers) = mpsc::unbounded_channel::<Trigger>();

        let _subscription = match &detector {
            Some(detector) => {
                let tx = trigger_tx.clone();
                let subscription = detector.on_detection(move |detection| {
                    let _ = tx.send(Trigger::WakeWord(detection.clone()));
                });
                match detector.initialize(Arc::clone(&self.wake_word)).await {
                    Ok(()) => {
                        if let Err(e) = detector.arm() {
                            tracing::warn!(error = %e, "wake word not armed");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "wake word unavailable"),
                }
                tracing::info!(status = %detector.status_message(), "wake word detector");
                Some(subscription)
            }
            None => None,
        };

        if detector.as_ref().is_some_and(|d| d.is_armed()) {
            println!("Say the wake word or press Enter to talk. q quits.");
        } else {
            println!("Press Enter to talk. q quits.");
        }

        let mut lines = read_lines()?;
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut work = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                Some(trigger) = triggers.recv() => {
                    work.spawn(run_cycle(Arc::clone(&orchestrator), trigger));
                }
                Some(done) = work.join_next(), if !work.is_empty() => {
                    if let Err(e) = done {
                        tracing::error!(error = %e, "pipeline task failed");
                    }
                }
                line = lines.recv() => {
                    let Some(line) = line else {
                        tracing::debug!("stdin closed");
                        break;
                    };
                    match Input::parse(&line) {
                        Input::Quit => break,
                        Input::Enter => match orchestrator.phase() {
                            Phase::Idle => {
                                work.spawn(run_cycle(Arc::clone(&orchestrator), Trigger::Manual));
                            }
                            // Enter during capture ends the utterance early
                            Phase::Capturing => capture.stop(),
                            phase => tracing::debug!(?phase, "enter ignored"),
                        },
                        Input::Decision(decision) => {
                            if orchestrator.phase() == Phase::AwaitingConfirmation {
                                work.spawn(decide(Arc::clone(&orchestrator), decision));
                            }
                        }
                        Input::Other => {
                            if orchestrator.phase() == Phase::AwaitingConfirmation {
                                println!("Press y to run or n to cancel.");
                            }
                        }
                    }
                }
            }
        }

        work.shutdown().await;
        if let Some(detector) = &detector {
            detector.destroy();
        }
        drop(orchestrator);
        drop(capture);
        drop(detector);
        let _ = printer.await;
        Ok(())
    }

    /// Run one manually triggered cycle and resolve its confirmation
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer or inference client cannot be built,
    /// or if the confirmed command cannot be started
    pub async fn listen_once(&self) -> Result<()> {
        let Components {
            orchestrator,
            capture,
            events,
            ..
        } = self.build(false)?;
        let printer = tokio::spawn(print_events(events));

        println!("Listening...");
        let outcome = orchestrator.run_cycle(Trigger::Manual).await;
        tracing::debug!(?outcome, "cycle finished");

        let result = if matches!(outcome, CycleOutcome::Pending(_)) {
            let mut lines = read_lines()?;
            let decision = loop {
                match lines.recv().await {
                    Some(line) => match Input::parse(&line) {
                        Input::Decision(decision) => break decision,
                        Input::Quit => break Decision::Cancel,
                        Input::Enter | Input::Other => println!("Press y to run or n to cancel."),
                    },
                    None => break Decision::Cancel,
                }
            };
            match decision {
                Decision::Run => orchestrator.confirm().await.map(|_| ()),
                Decision::Cancel => {
                    orchestrator.cancel();
                    Ok(())
                }
            }
        } else {
            Ok(())
        };

        drop(orchestrator);
        drop(capture);
        let _ = printer.await;
        result
    }
}

/// Forward stdin lines from a dedicated thread
///
/// A blocked read on this thread never holds up runtime shutdown.
fn read_lines() -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("gitty-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

async fn run_cycle(orchestrator: Arc<PipelineOrchestrator>, trigger: Trigger) {
    let outcome = orchestrator.run_cycle(trigger).await;
    tracing::debug!(?outcome, "cycle finished");
}

async fn decide(orchestrator: Arc<PipelineOrchestrator>, decision: Decision) {
    match decision {
        Decision::Run => {
            // Failures are already surfaced as events
            let _ = orchestrator.confirm().await;
        }
        Decision::Cancel => {
            orchestrator.cancel();
        }
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = events.recv().await {
        render(&event);
    }
}

fn render(event: &PipelineEvent) {
    match event {
        PipelineEvent::Listening => println!("Listening..."),
        PipelineEvent::Transcript(text) => println!("> {text}"),
        PipelineEvent::Notice(notice) => println!("{notice}"),
        PipelineEvent::Clarification(question) => println!("? {question}"),
        PipelineEvent::Proposal {
            command,
            explanation,
            help,
        } => {
            println!("\n  {command}");
            if !explanation.is_empty() {
                println!("  {explanation}");
            }
            if let Some(help) = help {
                println!("  ({help})");
            }
            println!("Run it? [y/n]");
        }
        PipelineEvent::Output(OutputChunk::Stdout(text)) => print!("{text}"),
        PipelineEvent::Output(OutputChunk::Stderr(text)) => eprint!("{text}"),
        PipelineEvent::Finished(output) => match output.exit_code {
            Some(0) => {}
            Some(code) => println!("git exited with status {code}"),
            None => println!("git was terminated by a signal"),
        },
        PipelineEvent::Error { kind, message } => eprintln!("error ({kind:?}): {message}"),
    }
}
