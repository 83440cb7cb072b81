//! Repository state probing
//!
//! Builds a [`RepoSnapshot`] from a handful of independent read-only git
//! queries. Every query has its own timeout and every failure degrades to a
//! default value: probing never returns an error.

mod status;

pub use status::{MAX_LISTED_FILES, StatusSummary, parse_porcelain};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Default timeout for a single git query
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Commits unique to each side of the upstream comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AheadBehind {
    /// Commits reachable from HEAD only
    pub ahead: u32,
    /// Commits reachable from the upstream only
    pub behind: u32,
}

/// Repository state captured at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSnapshot {
    pub in_repo: bool,
    /// Current branch; `None` when detached or unknown
    pub branch: Option<String>,
    pub upstream: Option<String>,
    /// Only set when `upstream` is set and the count query parsed
    pub ahead_behind: Option<AheadBehind>,
    pub dirty: bool,
    pub dirty_files: Vec<String>,
    #[serde(default)]
    pub staged_files: Vec<String>,
    #[serde(default)]
    pub unstaged_files: Vec<String>,
    #[serde(default)]
    pub untracked_files: Vec<String>,
    /// RFC 3339 capture time
    pub timestamp: String,
}

impl RepoSnapshot {
    /// Snapshot for a directory outside any work tree
    #[must_use]
    pub fn outside_repo() -> Self {
        Self {
            in_repo: false,
            branch: None,
            upstream: None,
            ahead_behind: None,
            dirty: false,
            dirty_files: Vec::new(),
            staged_files: Vec::new(),
            unstaged_files: Vec::new(),
            untracked_files: Vec::new(),
            timestamp: now_rfc3339(),
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Runs one read-only git query
#[async_trait]
pub trait GitQuery: Send + Sync {
    /// Run `git <args>` in `cwd`
    ///
    /// Returns stdout without trailing whitespace on a zero exit; `None` on
    /// spawn failure, non-zero exit or timeout.
    async fn query(&self, args: &[&str], cwd: Option<&Path>) -> Option<String>;
}

/// [`GitQuery`] backed by the system `git` binary
#[derive(Debug, Clone)]
pub struct SystemGit {
    program: PathBuf,
    timeout: Duration,
}

impl SystemGit {
    /// Locate `git` on `PATH`, falling back to the bare name
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let program = which::which("git").unwrap_or_else(|_| PathBuf::from("git"));
        Self { program, timeout }
    }
}

impl Default for SystemGit {
    fn default() -> Self {
        Self::new(PROBE_TIMEOUT)
    }
}

#[async_trait]
impl GitQuery for SystemGit {
    async fn query(&self, args: &[&str], cwd: Option<&Path>) -> Option<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("GIT_PAGER", "cat")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        // cwd is per command, never process-wide
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!(error = %e, ?args, "git probe spawn failed");
                return None;
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, ?args, "git probe failed");
                return None;
            }
            Err(_) => {
                tracing::debug!(?args, timeout = ?self.timeout, "git probe timed out");
                return None;
            }
        };

        if !output.status.success() {
            return None;
        }
        // Leading whitespace is significant in porcelain output
        Some(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

/// Queries version-control state with graceful degradation
#[derive(Clone)]
pub struct RepositoryProbe {
    git: Arc<dyn GitQuery>,
}

impl RepositoryProbe {
    /// Create a probe over the given query backend
    #[must_use]
    pub fn new(git: Arc<dyn GitQuery>) -> Self {
        Self { git }
    }

    /// Create a probe backed by the system `git`
    #[must_use]
    pub fn system() -> Self {
        Self::new(Arc::new(SystemGit::default()))
    }

    /// Capture a fresh snapshot of `cwd` (or the process directory)
    pub async fn snapshot(&self, cwd: Option<&Path>) -> RepoSnapshot {
        let timestamp = now_rfc3339();

        let in_work_tree = self
            .git
            .query(&["rev-parse", "--is-inside-work-tree"], cwd)
            .await
            .is_some_and(|out| out == "true");
        if !in_work_tree {
            tracing::debug!(cwd = ?cwd, "not inside a work tree");
            return RepoSnapshot {
                timestamp,
                ..RepoSnapshot::outside_repo()
            };
        }

        let (branch, status, upstream) = tokio::join!(
            self.git.query(&["rev-parse", "--abbrev-ref", "HEAD"], cwd),
            self.git.query(&["status", "--porcelain"], cwd),
            self.git.query(
                &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
                cwd
            ),
        );

        let branch = branch.filter(|b| !b.is_empty() && b != "HEAD");
        let status = parse_porcelain(&status.unwrap_or_default());
        let upstream = upstream.filter(|u| !u.is_empty());

        let ahead_behind = match &upstream {
            Some(upstream) => {
                let range = format!("{upstream}...HEAD");
                self.git
                    .query(&["rev-list", "--left-right", "--count", &range], cwd)
                    .await
                    .and_then(|out| parse_ahead_behind(&out))
            }
            None => None,
        };

        tracing::debug!(
            branch = ?branch,
            upstream = ?upstream,
            dirty = status.dirty,
            files = status.files.len(),
            "repository snapshot captured"
        );

        RepoSnapshot {
            in_repo: true,
            branch,
            upstream,
            ahead_behind,
            dirty: status.dirty,
            dirty_files: status.files,
            staged_files: status.staged,
            unstaged_files: status.unstaged,
            untracked_files: status.untracked,
            timestamp,
        }
    }
}

/// Parse `rev-list --left-right --count upstream...HEAD` output
///
/// Left count is upstream-only commits (behind), right count is HEAD-only
/// commits (ahead). Both must be non-negative integers.
#[must_use]
pub fn parse_ahead_behind(output: &str) -> Option<AheadBehind> {
    let mut parts = output.split_whitespace();
    let behind = parts.next()?.parse().ok()?;
    let ahead = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(AheadBehind { ahead, behind })
}
