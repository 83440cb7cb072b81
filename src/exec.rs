//! Git command execution with streamed output

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Incremental output as it arrives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

/// Completed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a confirmed git command
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `git <args>` in `cwd`, forwarding output chunks to `output`
    ///
    /// A non-zero exit is a normal result, not an error.
    ///
    /// # Errors
    ///
    /// Returns `Execution` if the process cannot be started or awaited
    async fn exec(
        &self,
        args: &[String],
        cwd: Option<&Path>,
        output: Option<&mpsc::UnboundedSender<OutputChunk>>,
    ) -> Result<ExecOutput>;
}

/// [`CommandExecutor`] backed by the system `git`
#[derive(Debug, Clone)]
pub struct GitExecutor {
    program: PathBuf,
}

impl GitExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: which::which("git").unwrap_or_else(|_| PathBuf::from("git")),
        }
    }
}

impl Default for GitExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for GitExecutor {
    async fn exec(
        &self,
        args: &[String],
        cwd: Option<&Path>,
        output: Option<&mpsc::UnboundedSender<OutputChunk>>,
    ) -> Result<ExecOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("GIT_PAGER", "cat")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        tracing::info!(?args, cwd = ?cwd, "running git");

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Execution(format!("failed to start git: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout, stderr) = tokio::join!(
            pump(stdout, output, OutputChunk::Stdout),
            pump(stderr, output, OutputChunk::Stderr),
        );

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Execution(format!("failed to wait for git: {e}")))?;

        tracing::info!(exit_code = ?status.code(), "git finished");

        Ok(ExecOutput {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Read a pipe to the end, forwarding each chunk
async fn pump<R>(
    pipe: Option<R>,
    output: Option<&mpsc::UnboundedSender<OutputChunk>>,
    wrap: fn(String) -> OutputChunk,
) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let Some(mut pipe) = pipe else {
        return collected;
    };

    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                collected.extend_from_slice(&buf[..n]);
                if let Some(tx) = output {
                    let _ = tx.send(wrap(String::from_utf8_lossy(&buf[..n]).into_owned()));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed reading git output");
                break;
            }
        }
    }
    collected
}
