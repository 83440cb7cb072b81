//! Confirmation gate for proposed commands
//!
//! Holds at most one [`PendingCommand`]. A pending command leaves the gate
//! only through an explicit run or cancel decision.

use crate::inference::CommandProposal;
use crate::{Error, Result};

/// Command awaiting the user's decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Command line without the leading `git`, e.g. `diff --stat`
    pub command: String,
    /// Argument vector handed to the executor
    pub args: Vec<String>,
    /// Explanation from the proposal
    pub explanation: String,
}

impl PendingCommand {
    /// Build from a runnable proposal
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the proposal asks for clarification or has no
    /// arguments after stripping `git`
    pub fn from_proposal(proposal: &CommandProposal) -> Result<Self> {
        if proposal.needs_clarification {
            return Err(Error::Validation(
                "proposal needs clarification and cannot run".to_string(),
            ));
        }
        let command = normalize_command(&proposal.command);
        let args = split_args(&command);
        if args.is_empty() {
            return Err(Error::Validation(format!(
                "no git arguments in {:?}",
                proposal.command
            )));
        }
        Ok(Self {
            command,
            args,
            explanation: proposal.explanation.clone(),
        })
    }

    /// Full command line as shown to the user
    #[must_use]
    pub fn display(&self) -> String {
        format!("git {}", self.command)
    }

    /// One-line description of the subcommand, for learning mode
    #[must_use]
    pub fn subcommand_help(&self) -> &'static str {
        explain_subcommand(&self.command)
    }
}

/// User decision on a pending command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run,
    Cancel,
}

impl Decision {
    /// Map a single key: `y` runs, `n` cancels, anything else is ignored
    #[must_use]
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'y' => Some(Self::Run),
            'n' => Some(Self::Cancel),
            _ => None,
        }
    }

    /// Map a line of input; only a single accept/reject character counts
    #[must_use]
    pub fn from_input(input: &str) -> Option<Self> {
        let mut chars = input.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(key), None) => Self::from_key(key),
            _ => None,
        }
    }
}

/// Slot holding at most one pending command
#[derive(Debug, Default)]
pub struct ConfirmationGate {
    pending: Option<PendingCommand>,
}

impl ConfirmationGate {
    #[must_use]
    pub const fn new() -> Self {
        Self { pending: None }
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Hold a command for confirmation
    ///
    /// # Errors
    ///
    /// Returns `PendingCommandExists` if a command is already held
    pub fn set_pending(&mut self, command: PendingCommand) -> Result<()> {
        if let Some(existing) = &self.pending {
            return Err(Error::PendingCommandExists(existing.display()));
        }
        self.pending = Some(command);
        Ok(())
    }

    /// Retire the pending command
    pub const fn take(&mut self) -> Option<PendingCommand> {
        self.pending.take()
    }
}

/// Strip a leading `git` token
#[must_use]
pub fn normalize_command(command: &str) -> String {
    let trimmed = command.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) if first == "git" => rest.trim_start().to_string(),
        None if trimmed == "git" => String::new(),
        _ => trimmed.to_string(),
    }
}

/// Split on whitespace, grouping single- or double-quoted words
///
/// Quotes are removed; an empty quoted string yields an empty argument.
#[must_use]
pub fn split_args(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in command.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        args.push(current);
    }
    args
}

/// Fixed description of common subcommands
#[must_use]
pub fn explain_subcommand(command: &str) -> &'static str {
    let first = command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    match first.as_str() {
        "status" => "Shows the current state of your working directory and staging area",
        "log" => "Displays commit history for the current branch",
        "diff" => "Shows changes between commits, commit and working tree, etc",
        "add" => "Adds file contents to the staging area (index)",
        "commit" => "Records changes to the repository",
        "push" => "Updates remote refs along with associated objects",
        "pull" => "Fetches from and integrates with another repository or local branch",
        "branch" => "Lists, creates, or deletes branches",
        "checkout" => "Switches branches or restores working tree files",
        "merge" => "Joins two or more development histories together",
        "clone" => "Clones a repository into a new directory",
        "init" => "Creates an empty Git repository or reinitializes an existing one",
        "fetch" => "Downloads objects and refs from another repository",
        "reset" => "Resets current HEAD to the specified state",
        "rebase" => "Reapplies commits on top of another base tip",
        _ => "Executes a git command",
    }
}
