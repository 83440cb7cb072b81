//! Orchestrator integration tests
//!
//! Drives full cycles with scripted capture, git, inference and execution

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use gitty::config::SessionConfig;
use gitty::exec::OutputChunk;
use gitty::pipeline::{Notice, PipelineEvent};
use gitty::repo::RepositoryProbe;
use gitty::voice::{Microphone, WakeWordDetector};
use gitty::{CycleOutcome, Decision, ErrorKind, Phase, PipelineOrchestrator, Trigger};

mod common;

use common::{
    FakeGit, FixedCapture, RecordingExecutor, ScriptedAudio, ScriptedBackend, ScriptedInference,
};

struct Harness {
    orchestrator: PipelineOrchestrator,
    capture: Arc<FixedCapture>,
    inference: Arc<ScriptedInference>,
    executor: Arc<RecordingExecutor>,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
}

impl Harness {
    fn new(capture: FixedCapture, git: FakeGit, inference: ScriptedInference) -> Self {
        let capture = Arc::new(capture);
        let inference = Arc::new(inference);
        let executor = Arc::new(RecordingExecutor::new());
        let (tx, events) = mpsc::unbounded_channel();
        let orchestrator = PipelineOrchestrator::new(
            Arc::clone(&capture) as _,
            RepositoryProbe::new(Arc::new(git)),
            Arc::clone(&inference) as _,
            Arc::clone(&executor) as _,
            tx,
        );
        Self {
            orchestrator,
            capture,
            inference,
            executor,
            events,
        }
    }

    fn drain(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn diff_reply() -> serde_json::Value {
    json!({
        "command": "git diff",
        "explanation": "Shows unstaged changes",
        "needsClarification": false
    })
}

/// Detector armed on a scripted microphone
async fn armed_detector() -> (Arc<WakeWordDetector>, Arc<ScriptedAudio>) {
    let audio = Arc::new(ScriptedAudio::new());
    let detector = Arc::new(WakeWordDetector::new(
        Arc::new(ScriptedBackend::new()),
        Arc::clone(&audio) as _,
        Microphone::new(),
        Duration::from_millis(2000),
    ));
    detector
        .initialize(Arc::new(common::wake_word_config(Duration::from_millis(2000))))
        .await
        .unwrap();
    detector.arm().unwrap();
    (detector, audio)
}

#[tokio::test]
async fn test_utterance_to_confirmed_diff() {
    let mut h = Harness::new(
        FixedCapture::transcript("show me what changed"),
        FakeGit::repo("main", " M a.txt"),
        ScriptedInference::reply(diff_reply()),
    );

    let outcome = h.orchestrator.run_cycle(Trigger::Manual).await;

    let CycleOutcome::Pending(pending) = outcome else {
        panic!("expected a pending command, got {outcome:?}");
    };
    assert_eq!(pending.command, "diff");
    assert_eq!(h.orchestrator.phase(), Phase::AwaitingConfirmation);

    // Inference saw the utterance and the repository state
    {
        let seen = h.inference.seen.lock().unwrap();
        let (utterance, snapshot, history) = &seen[0];
        assert_eq!(utterance, "show me what changed");
        assert!(snapshot.in_repo);
        assert_eq!(snapshot.branch.as_deref(), Some("main"));
        assert!(snapshot.dirty);
        assert_eq!(snapshot.dirty_files, ["a.txt"]);
        assert!(history.is_empty());
    }

    let output = h.orchestrator.confirm().await.unwrap().unwrap();
    assert!(output.success());
    assert_eq!(h.executor.runs(), [vec!["diff".to_string()]]);
    assert_eq!(h.orchestrator.phase(), Phase::Idle);
    assert_eq!(h.orchestrator.history(), ["git diff"]);

    let events = h.drain();
    assert_eq!(events[0], PipelineEvent::Listening);
    assert_eq!(
        events[1],
        PipelineEvent::Transcript("show me what changed".to_string())
    );
    assert!(events.contains(&PipelineEvent::Proposal {
        command: "git diff".to_string(),
        explanation: "Shows unstaged changes".to_string(),
        help: None,
    }));
    assert!(events.contains(&PipelineEvent::Output(OutputChunk::Stdout(
        "ran diff\n".to_string()
    ))));
    assert!(matches!(events.last(), Some(PipelineEvent::Finished(_))));
}

#[tokio::test]
async fn test_history_feeds_next_inference() {
    let h = Harness::new(
        FixedCapture::transcript("show me what changed"),
        FakeGit::repo("main", ""),
        ScriptedInference::reply(diff_reply()),
    );

    for _ in 0..2 {
        h.orchestrator.run_cycle(Trigger::Manual).await;
        h.orchestrator.confirm().await.unwrap();
    }

    let seen = h.inference.seen.lock().unwrap();
    assert!(seen[0].2.is_empty());
    assert_eq!(seen[1].2, ["git diff"]);
}

#[tokio::test]
async fn test_outside_repository_skips_inference_and_rearms() {
    let (detector, audio) = armed_detector().await;
    let mut h = Harness::new(
        FixedCapture::transcript("show me what changed"),
        FakeGit::outside(),
        ScriptedInference::reply(diff_reply()),
    );
    h.orchestrator = h.orchestrator.with_wake_word(Arc::clone(&detector));

    let outcome = h.orchestrator.run_cycle(Trigger::Manual).await;

    assert_eq!(outcome, CycleOutcome::NotARepository);
    assert_eq!(h.inference.calls(), 0);
    assert!(
        h.drain()
            .contains(&PipelineEvent::Notice(Notice::NotARepository))
    );

    // Paused for the cycle, then re-armed on a fresh stream
    assert_eq!(audio.opened(), 2);
    assert_eq!(audio.released(), 1);
    assert!(detector.is_armed());
    assert_eq!(h.orchestrator.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_detector_rearms_before_idle() {
    let (detector, audio) = armed_detector().await;
    let h = Harness::new(
        FixedCapture::transcript("show me what changed"),
        FakeGit::outside(),
        ScriptedInference::reply(diff_reply()),
    );
    let orchestrator = Arc::new(h.orchestrator.with_wake_word(Arc::clone(&detector)));

    // Phase seen by the device each time the detector opens it
    let phases = Arc::new(Mutex::new(Vec::new()));
    let weak = Arc::downgrade(&orchestrator);
    let seen = Arc::clone(&phases);
    audio.set_on_open(move || {
        if let Some(orchestrator) = weak.upgrade() {
            seen.lock().unwrap().push(orchestrator.phase());
        }
    });

    let outcome = orchestrator.run_cycle(Trigger::Manual).await;

    assert_eq!(outcome, CycleOutcome::NotARepository);
    let phases = phases.lock().unwrap().clone();
    assert_eq!(phases.len(), 1);
    assert_ne!(phases[0], Phase::Idle);
    assert!(detector.is_armed());
    assert_eq!(orchestrator.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_manual_trigger_never_arms_idle_detector() {
    let audio = Arc::new(ScriptedAudio::new());
    let detector = Arc::new(WakeWordDetector::new(
        Arc::new(ScriptedBackend::new()),
        Arc::clone(&audio) as _,
        Microphone::new(),
        Duration::from_millis(2000),
    ));
    detector
        .initialize(Arc::new(common::wake_word_config(Duration::from_millis(2000))))
        .await
        .unwrap();

    let mut h = Harness::new(
        FixedCapture::no_speech(),
        FakeGit::repo("main", ""),
        ScriptedInference::reply(diff_reply()),
    );
    h.orchestrator = h.orchestrator.with_wake_word(Arc::clone(&detector));

    let outcome = h.orchestrator.run_cycle(Trigger::Manual).await;

    assert_eq!(outcome, CycleOutcome::NoSpeech);
    assert!(h.drain().contains(&PipelineEvent::Notice(Notice::NoSpeech)));
    assert!(!detector.is_armed());
    assert_eq!(audio.opened(), 0);
}

#[tokio::test]
async fn test_rearm_waits_for_confirmation() {
    let (detector, _audio) = armed_detector().await;
    let mut h = Harness::new(
        FixedCapture::transcript("show me what changed"),
        FakeGit::repo("main", ""),
        ScriptedInference::reply(diff_reply()),
    );
    h.orchestrator = h.orchestrator.with_wake_word(Arc::clone(&detector));

    h.orchestrator.run_cycle(Trigger::Manual).await;
    assert!(!detector.is_armed());

    assert!(h.orchestrator.cancel());
    assert!(detector.is_armed());
}

#[tokio::test]
async fn test_trigger_while_pending_is_ignored() {
    let h = Harness::new(
        FixedCapture::transcript("show me what changed"),
        FakeGit::repo("main", ""),
        ScriptedInference::reply(diff_reply()),
    );

    let first = h.orchestrator.run_cycle(Trigger::Manual).await;
    assert!(matches!(first, CycleOutcome::Pending(_)));

    let second = h.orchestrator.run_cycle(Trigger::Manual).await;
    assert_eq!(second, CycleOutcome::Ignored);
    assert_eq!(h.capture.calls(), 1);
    assert_eq!(h.orchestrator.pending().map(|p| p.command), Some("diff".to_string()));
}

#[tokio::test]
async fn test_cancel_discards_pending() {
    let mut h = Harness::new(
        FixedCapture::transcript("show me what changed"),
        FakeGit::repo("main", ""),
        ScriptedInference::reply(diff_reply()),
    );

    h.orchestrator.run_cycle(Trigger::Manual).await;
    let decision = h.orchestrator.handle_key('n').await.unwrap();

    assert_eq!(decision, Some(Decision::Cancel));
    assert!(h.orchestrator.pending().is_none());
    assert!(h.executor.runs().is_empty());
    assert!(h.orchestrator.history().is_empty());
    assert!(h.drain().contains(&PipelineEvent::Notice(Notice::Cancelled)));

    // Nothing left to decide
    assert!(!h.orchestrator.cancel());
    assert_eq!(h.orchestrator.confirm().await.unwrap(), None);
}

#[tokio::test]
async fn test_other_keys_leave_pending_alone() {
    let h = Harness::new(
        FixedCapture::transcript("show me what changed"),
        FakeGit::repo("main", ""),
        ScriptedInference::reply(diff_reply()),
    );

    h.orchestrator.run_cycle(Trigger::Manual).await;

    assert_eq!(h.orchestrator.handle_key('x').await.unwrap(), None);
    assert!(h.orchestrator.pending().is_some());

    assert_eq!(
        h.orchestrator.handle_key('Y').await.unwrap(),
        Some(Decision::Run)
    );
    assert_eq!(h.executor.runs().len(), 1);
}

#[tokio::test]
async fn test_clarification_leaves_nothing_pending() {
    let mut h = Harness::new(
        FixedCapture::transcript("do the thing"),
        FakeGit::repo("main", ""),
        ScriptedInference::reply(json!({
            "command": "",
            "needs_clarification": true,
            "clarification_question": "Which branch?"
        })),
    );

    let outcome = h.orchestrator.run_cycle(Trigger::Manual).await;

    assert_eq!(outcome, CycleOutcome::Clarification("Which branch?".to_string()));
    assert!(h.orchestrator.pending().is_none());
    assert_eq!(h.orchestrator.phase(), Phase::Idle);
    assert!(
        h.drain()
            .contains(&PipelineEvent::Clarification("Which branch?".to_string()))
    );
}

#[tokio::test]
async fn test_service_failure_ends_cycle() {
    let (detector, _audio) = armed_detector().await;
    let mut h = Harness::new(
        FixedCapture::transcript("show me what changed"),
        FakeGit::repo("main", ""),
        ScriptedInference::failing("connection refused"),
    );
    h.orchestrator = h.orchestrator.with_wake_word(Arc::clone(&detector));

    let outcome = h.orchestrator.run_cycle(Trigger::Manual).await;

    assert_eq!(outcome, CycleOutcome::Failed(ErrorKind::Service));
    assert!(h.orchestrator.pending().is_none());
    assert!(detector.is_armed());
    let events = h.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::Error { kind: ErrorKind::Service, message } if message.contains("connection refused")
    )));
}

#[tokio::test]
async fn test_chained_command_is_rejected() {
    let h = Harness::new(
        FixedCapture::transcript("commit and push"),
        FakeGit::repo("main", ""),
        ScriptedInference::reply(json!({
            "command": "git commit -am wip && git push",
            "needsClarification": false
        })),
    );

    let outcome = h.orchestrator.run_cycle(Trigger::Manual).await;

    assert_eq!(outcome, CycleOutcome::Failed(ErrorKind::Validation));
    assert!(h.orchestrator.pending().is_none());
}

#[tokio::test]
async fn test_permission_failure_is_reported() {
    let mut h = Harness::new(
        FixedCapture::denied(),
        FakeGit::repo("main", ""),
        ScriptedInference::reply(diff_reply()),
    );

    let outcome = h.orchestrator.run_cycle(Trigger::Manual).await;

    assert_eq!(outcome, CycleOutcome::Failed(ErrorKind::Permission));
    assert_eq!(h.inference.calls(), 0);
    assert!(h.drain().iter().any(|e| matches!(
        e,
        PipelineEvent::Error {
            kind: ErrorKind::Permission,
            ..
        }
    )));
}

#[tokio::test]
async fn test_learning_mode_adds_help() {
    let mut h = Harness::new(
        FixedCapture::transcript("show me what changed"),
        FakeGit::repo("main", ""),
        ScriptedInference::reply(diff_reply()),
    );
    h.orchestrator = h.orchestrator.with_session(SessionConfig {
        learning_mode: true,
        history_limit: 10,
    });

    h.orchestrator.run_cycle(Trigger::Manual).await;

    let help = h.drain().into_iter().find_map(|e| match e {
        PipelineEvent::Proposal { help, .. } => help,
        _ => None,
    });
    assert!(help.is_some_and(|h| !h.is_empty()));
}
