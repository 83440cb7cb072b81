//! Events surfaced to the UI layer

use std::fmt;

use crate::ErrorKind;
use crate::exec::{ExecOutput, OutputChunk};

/// User-facing notices that end a cycle without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    NoSpeech,
    NotARepository,
    Cancelled,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpeech => write!(f, "No speech detected"),
            Self::NotARepository => write!(f, "Not a git repository"),
            Self::Cancelled => write!(f, "Command cancelled"),
        }
    }
}

/// Progress of the pipeline, in order of occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Capture started
    Listening,
    /// Utterance recognized
    Transcript(String),
    Notice(Notice),
    /// Model asked a question instead of proposing a command
    Clarification(String),
    /// Command awaiting confirmation
    Proposal {
        /// Full command line, e.g. `git diff`
        command: String,
        explanation: String,
        /// Subcommand description, set in learning mode
        help: Option<&'static str>,
    },
    /// Incremental command output
    Output(OutputChunk),
    /// Command finished
    Finished(ExecOutput),
    /// Cycle failed
    Error {
        kind: ErrorKind,
        message: String,
    },
}
