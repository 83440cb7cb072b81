//! Voice command pipeline
//!
//! Drives one cycle at a time: trigger, capture, repository probe,
//! inference, confirmation and execution. All mutable session state lives in
//! a single [`Phase`]-tagged value behind one lock.
//!
//! The wake word detector is re-armed after a cycle if and only if it was
//! armed when the cycle started, whichever way the cycle ends.

mod event;
mod history;

pub use event::{Notice, PipelineEvent};
pub use history::CommandHistory;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::confirm::{ConfirmationGate, Decision, PendingCommand};
use crate::exec::{CommandExecutor, ExecOutput, OutputChunk};
use crate::inference::CommandInference;
use crate::repo::RepositoryProbe;
use crate::voice::{CaptureOutcome, UtteranceCapture, WakeWordDetection, WakeWordDetector};
use crate::{Error, ErrorKind, Result};

/// What started a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    WakeWord(WakeWordDetection),
    Manual,
}

/// Where the pipeline is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Capturing,
    Inferring,
    AwaitingConfirmation,
    Executing,
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A cycle or a pending command was already active
    Ignored,
    NoSpeech,
    NotARepository,
    /// Model asked a question; nothing is pending
    Clarification(String),
    /// Command is waiting for confirmation
    Pending(PendingCommand),
    Failed(ErrorKind),
}

struct Session {
    phase: Phase,
    gate: ConfirmationGate,
    /// Detector state when the current cycle started
    was_armed: bool,
    history: CommandHistory,
    learning_mode: bool,
}

/// Wires capture, probe, inference, confirmation and execution together
pub struct PipelineOrchestrator {
    capture: Arc<dyn UtteranceCapture>,
    probe: RepositoryProbe,
    inference: Arc<dyn CommandInference>,
    executor: Arc<dyn CommandExecutor>,
    detector: Option<Arc<WakeWordDetector>>,
    cwd: Option<PathBuf>,
    session: Mutex<Session>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl PipelineOrchestrator {
    pub fn new(
        capture: Arc<dyn UtteranceCapture>,
        probe: RepositoryProbe,
        inference: Arc<dyn CommandInference>,
        executor: Arc<dyn CommandExecutor>,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Self {
        let defaults = SessionConfig::default();
        Self {
            capture,
            probe,
            inference,
            executor,
            detector: None,
            cwd: None,
            session: Mutex::new(Session {
                phase: Phase::Idle,
                gate: ConfirmationGate::new(),
                was_armed: false,
                history: CommandHistory::new(defaults.history_limit),
                learning_mode: defaults.learning_mode,
            }),
            events,
        }
    }

    /// Pause and re-arm this detector around cycles
    #[must_use]
    pub fn with_wake_word(mut self, detector: Arc<WakeWordDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Probe and execute in `cwd` instead of the process directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    #[must_use]
    pub fn with_session(self, config: SessionConfig) -> Self {
        {
            let mut session = self.lock();
            session.history = CommandHistory::new(config.history_limit);
            session.learning_mode = config.learning_mode;
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn pending(&self) -> Option<PendingCommand> {
        self.lock().gate.pending().cloned()
    }

    /// Confirmed commands, oldest first
    pub fn history(&self) -> Vec<String> {
        self.lock().history.to_vec()
    }

    pub fn set_learning_mode(&self, enabled: bool) {
        self.lock().learning_mode = enabled;
    }

    /// Run one cycle up to the confirmation prompt
    ///
    /// Ignored unless the pipeline is idle: a trigger arriving during a
    /// cycle or while a command is pending is dropped, not queued.
    pub async fn run_cycle(&self, trigger: Trigger) -> CycleOutcome {
        let (was_armed, learning_mode) = {
            let mut session = self.lock();
            if session.phase != Phase::Idle {
                tracing::debug!(phase = ?session.phase, ?trigger, "cycle active, trigger ignored");
                return CycleOutcome::Ignored;
            }
            let was_armed = self.detector.as_ref().is_some_and(|d| d.is_armed());
            session.phase = Phase::Capturing;
            session.was_armed = was_armed;
            (was_armed, session.learning_mode)
        };

        tracing::info!(?trigger, was_armed, "voice cycle started");

        // Hand the microphone over to capture
        if let Some(detector) = &self.detector {
            detector.disarm();
        }
        self.emit(PipelineEvent::Listening);

        let transcript = match self.capture.capture().await {
            Ok(Some(CaptureOutcome::Transcript(text))) => text,
            Ok(Some(CaptureOutcome::NoSpeech)) => {
                return self.end_with_notice(Notice::NoSpeech, CycleOutcome::NoSpeech, was_armed);
            }
            Ok(None) => {
                self.finish(was_armed);
                return CycleOutcome::Ignored;
            }
            Err(e) => return self.fail(e, was_armed),
        };
        tracing::info!(transcript = %transcript, "utterance captured");
        self.emit(PipelineEvent::Transcript(transcript.clone()));

        let snapshot = self.probe.snapshot(self.cwd.as_deref()).await;
        if !snapshot.in_repo {
            return self.end_with_notice(
                Notice::NotARepository,
                CycleOutcome::NotARepository,
                was_armed,
            );
        }

        let history = {
            let mut session = self.lock();
            session.phase = Phase::Inferring;
            session.history.to_vec()
        };

        let proposal = match self
            .inference
            .infer(&transcript, &snapshot, &history, learning_mode)
            .await
        {
            Ok(proposal) => proposal,
            Err(e) => return self.fail(e, was_armed),
        };

        if proposal.needs_clarification {
            let question = proposal.clarification_question.unwrap_or_default();
            tracing::info!(question = %question, "clarification needed");
            self.emit(PipelineEvent::Clarification(question.clone()));
            self.finish(was_armed);
            return CycleOutcome::Clarification(question);
        }

        let pending = match PendingCommand::from_proposal(&proposal) {
            Ok(pending) => pending,
            Err(e) => return self.fail(e, was_armed),
        };

        let held = {
            let mut session = self.lock();
            let held = session.gate.set_pending(pending.clone());
            if held.is_ok() {
                session.phase = Phase::AwaitingConfirmation;
            }
            held
        };
        if let Err(e) = held {
            return self.fail(e, was_armed);
        }

        tracing::info!(command = %pending.display(), "awaiting confirmation");
        self.emit(PipelineEvent::Proposal {
            command: pending.display(),
            explanation: pending.explanation.clone(),
            help: learning_mode.then(|| pending.subcommand_help()),
        });
        CycleOutcome::Pending(pending)
    }

    /// Run the pending command
    ///
    /// Returns `Ok(None)` when nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns `Execution` if git cannot be started
    pub async fn confirm(&self) -> Result<Option<ExecOutput>> {
        let (pending, was_armed) = {
            let mut session = self.lock();
            if session.phase != Phase::AwaitingConfirmation {
                return Ok(None);
            }
            let Some(pending) = session.gate.take() else {
                session.phase = Phase::Idle;
                return Ok(None);
            };
            session.phase = Phase::Executing;
            (pending, session.was_armed)
        };

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<OutputChunk>();
        let events = self.events.clone();
        let forward = tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                let _ = events.send(PipelineEvent::Output(chunk));
            }
        });

        let result = self
            .executor
            .exec(&pending.args, self.cwd.as_deref(), Some(&chunk_tx))
            .await;
        drop(chunk_tx);
        let _ = forward.await;

        self.lock().history.push(pending.display());
        self.finish(was_armed);

        match result {
            Ok(output) => {
                self.emit(PipelineEvent::Finished(output.clone()));
                Ok(Some(output))
            }
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Drop the pending command; `false` when nothing is pending
    pub fn cancel(&self) -> bool {
        let was_armed = {
            let mut session = self.lock();
            if session.phase != Phase::AwaitingConfirmation {
                return false;
            }
            if let Some(pending) = session.gate.take() {
                tracing::info!(command = %pending.display(), "command cancelled");
            }
            session.was_armed
        };
        self.emit(PipelineEvent::Notice(Notice::Cancelled));
        self.finish(was_armed);
        true
    }

    /// Apply a single-key decision; other keys are ignored
    ///
    /// # Errors
    ///
    /// Propagates execution errors from [`confirm`](Self::confirm)
    pub async fn handle_key(&self, key: char) -> Result<Option<Decision>> {
        let Some(decision) = Decision::from_key(key) else {
            return Ok(None);
        };
        if self.phase() != Phase::AwaitingConfirmation {
            return Ok(None);
        }
        match decision {
            Decision::Run => {
                self.confirm().await?;
            }
            Decision::Cancel => {
                self.cancel();
            }
        }
        Ok(Some(decision))
    }

    fn end_with_notice(
        &self,
        notice: Notice,
        outcome: CycleOutcome,
        was_armed: bool,
    ) -> CycleOutcome {
        tracing::info!(%notice, "cycle ended");
        self.emit(PipelineEvent::Notice(notice));
        self.finish(was_armed);
        outcome
    }

    fn fail(&self, error: Error, was_armed: bool) -> CycleOutcome {
        let kind = error.kind();
        self.report(&error);
        self.finish(was_armed);
        CycleOutcome::Failed(kind)
    }

    fn report(&self, error: &Error) {
        let kind = error.kind();
        tracing::warn!(error = %error, ?kind, "voice cycle failed");
        self.emit(PipelineEvent::Error {
            kind,
            message: error.to_string(),
        });
    }

    /// Re-arm the detector if it was armed before, then return to idle
    ///
    /// A trigger arriving before the phase flips is ignored, so it can never
    /// take the microphone ahead of the detector.
    fn finish(&self, was_armed: bool) {
        if was_armed
            && let Some(detector) = &self.detector
            && let Err(e) = detector.arm()
        {
            self.report(&e);
        }
        self.lock().phase = Phase::Idle;
    }
}
