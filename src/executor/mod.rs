//! Subprocess execution for phase steps.
//!
//! Every external collaborator (type checker, test runner, audit, coverage
//! tools) is driven through [`CommandRunner`]. The system implementation
//! enforces a hard timeout, forwards cancellation to the live child, and
//! never leaves the child's process group running.

mod system;

#[cfg(test)]
pub(crate) mod fake;

pub use system::SystemRunner;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_KILL_GRACE;
use crate::error::PhaseError;
use crate::phase::CommandSpec;

/// Lines of output kept in failure messages.
pub const TAIL_LINES: usize = 20;

/// Characters of output kept in failure messages.
pub const TAIL_CHARS: usize = 2000;

/// Options for one subprocess invocation.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Hard limit on wall time.
    pub timeout: Duration,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Capture stdout/stderr instead of inheriting the console.
    pub capture_output: bool,
    /// Working directory for the child.
    pub working_dir: PathBuf,
    /// Time between SIGTERM and SIGKILL when terminating.
    pub kill_grace: Duration,
}

impl ExecOptions {
    /// Creates options with the given timeout, capturing output.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            env: Vec::new(),
            capture_output: true,
            working_dir: PathBuf::from("."),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets whether output is captured.
    pub fn with_capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Sets the termination grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

/// Output of a subprocess that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubprocessResult {
    pub exit_code: i32,
    /// Empty when output was not captured.
    pub stdout: String,
    pub stderr: String,
}

/// Runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion.
    ///
    /// Fails with [`PhaseError::Timeout`] if the process outlives
    /// `options.timeout`, [`PhaseError::Cancelled`] if `cancel` fires first
    /// or was already cancelled, and [`PhaseError::NonZeroExit`] with an
    /// output tail otherwise.
    async fn execute(
        &self,
        command: &CommandSpec,
        options: &ExecOptions,
        cancel: &CancellationToken,
    ) -> Result<SubprocessResult, PhaseError>;
}

/// Returns the last lines of `stderr`, or of `stdout` when stderr is empty.
pub fn output_tail(stdout: &str, stderr: &str) -> String {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<&str> = source
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    let tail = lines[start..].join("\n");

    let count = tail.chars().count();
    if count > TAIL_CHARS {
        tail.chars().skip(count - TAIL_CHARS).collect()
    } else {
        tail
    }
}
