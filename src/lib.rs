//! Gitty - voice-driven git assistant
//!
//! This library provides the pipeline behind the `gitty` binary:
//! - Wake word detection and speech capture with silence endpointing
//! - Repository state probing
//! - Command inference against an OpenAI-compatible chat endpoint
//! - Confirmation and execution of the proposed git command
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Interactive session                  │
//! │   Wake word  │  Enter (manual)  │  y / n  │  Ctrl-C   │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ Trigger
//! ┌────────────────────▼─────────────────────────────────┐
//! │                PipelineOrchestrator                   │
//! │  Capture → Probe → Inference → Confirmation → Exec    │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ PipelineEvent
//! ┌────────────────────▼─────────────────────────────────┐
//! │                     Terminal UI                       │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod confirm;
pub mod daemon;
pub mod error;
pub mod exec;
pub mod inference;
pub mod pipeline;
pub mod repo;
pub mod timer;
pub mod voice;

pub use config::Config;
pub use confirm::{ConfirmationGate, Decision, PendingCommand};
pub use daemon::Daemon;
pub use error::{Error, ErrorKind, Result};
pub use exec::{CommandExecutor, ExecOutput, GitExecutor, OutputChunk};
pub use inference::{CommandInference, CommandInferenceClient, CommandProposal};
pub use pipeline::{CycleOutcome, Phase, PipelineEvent, PipelineOrchestrator, Trigger};
pub use repo::{RepoSnapshot, RepositoryProbe};
