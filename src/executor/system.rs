//! Operating-system subprocess runner.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PhaseError;
use crate::phase::CommandSpec;

use super::{output_tail, CommandRunner, ExecOptions, SubprocessResult};

/// Runs commands as real child processes.
///
/// Each child is placed in its own process group so that termination
/// reaches everything it spawned (test runners fork worker pools).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn execute(
        &self,
        command: &CommandSpec,
        options: &ExecOptions,
        cancel: &CancellationToken,
    ) -> Result<SubprocessResult, PhaseError> {
        let command_line = command.display();

        if cancel.is_cancelled() {
            return Err(PhaseError::Cancelled { command: command_line });
        }

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&options.working_dir)
            .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if options.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| PhaseError::Spawn {
            command: command_line.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        debug!(
            command = %command_line,
            pid = ?pid,
            timeout_ms = options.timeout.as_millis() as u64,
            "spawned subprocess"
        );

        let mut stdout_reader = child.stdout.take().map(|s| tokio::spawn(read_stream(s)));
        let mut stderr_reader = child.stderr.take().map(|s| tokio::spawn(read_stream(s)));

        let outcome = tokio::select! {
            biased;

            _ = cancel.cancelled() => Outcome::Cancelled,
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(options.timeout) => Outcome::TimedOut,
        };

        match outcome {
            Outcome::Cancelled => {
                warn!(command = %command_line, "interrupt received, terminating subprocess");
                terminate_child(&mut child, pid, options.kill_grace).await;
                abort_reader(stdout_reader);
                abort_reader(stderr_reader);
                Err(PhaseError::Cancelled { command: command_line })
            }
            Outcome::TimedOut => {
                warn!(
                    command = %command_line,
                    timeout_ms = options.timeout.as_millis() as u64,
                    "subprocess timed out, terminating"
                );
                terminate_child(&mut child, pid, options.kill_grace).await;
                abort_reader(stdout_reader);
                abort_reader(stderr_reader);
                Err(PhaseError::Timeout {
                    command: command_line,
                    timeout: options.timeout,
                })
            }
            Outcome::Exited(Err(e)) => {
                terminate_child(&mut child, pid, options.kill_grace).await;
                abort_reader(stdout_reader);
                abort_reader(stderr_reader);
                Err(PhaseError::Spawn {
                    command: command_line,
                    reason: format!("failed to wait for process: {}", e),
                })
            }
            Outcome::Exited(Ok(status)) => {
                let stdout = collect_reader(&mut stdout_reader, options.kill_grace).await;
                let stderr = collect_reader(&mut stderr_reader, options.kill_grace).await;

                // A reader that never saw EOF means something in the group
                // still holds the pipe after the leader exited.
                if stdout.is_none() || stderr.is_none() {
                    warn!(command = %command_line, "subprocess left children behind, killing its group");
                    if let Some(pid) = pid {
                        signal_group(pid, Signal::Kill);
                    }
                }

                let stdout = stdout.unwrap_or_default();
                let stderr = stderr.unwrap_or_default();

                debug!(command = %command_line, exit_code = ?status.code(), "subprocess exited");

                if status.success() {
                    Ok(SubprocessResult {
                        exit_code: 0,
                        stdout,
                        stderr,
                    })
                } else {
                    Err(PhaseError::NonZeroExit {
                        command: command_line,
                        code: status.code(),
                        tail: output_tail(&stdout, &stderr),
                    })
                }
            }
        }
    }
}

async fn read_stream<R: AsyncRead + Unpin>(mut stream: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        debug!(error = %e, "error reading subprocess output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Waits up to `grace` for a reader to hit EOF.
///
/// Returns `Some("")` for an absent reader and `None` if the reader is still
/// blocked when the grace period ends.
async fn collect_reader(reader: &mut Option<JoinHandle<String>>, grace: Duration) -> Option<String> {
    let Some(handle) = reader.as_mut() else {
        return Some(String::new());
    };

    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) => {
            debug!(error = %e, "output reader task failed");
            Some(String::new())
        }
        Err(_) => {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
            None
        }
    }
}

fn abort_reader(reader: Option<JoinHandle<String>>) {
    if let Some(handle) = reader {
        handle.abort();
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

/// Terminates a child and its process group.
///
/// Sends SIGTERM first, waits up to `grace`, then SIGKILL. The group is
/// killed at the end regardless, so members that ignored SIGTERM after the
/// leader exited do not outlive the run.
async fn terminate_child(child: &mut Child, pid: Option<u32>, grace: Duration) {
    match pid {
        Some(pid) => signal_group(pid, Signal::Term),
        None => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "failed to signal child");
            }
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(exit_code = ?status.code(), "child exited after SIGTERM");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "error waiting for child after SIGTERM");
        }
        Err(_) => {
            warn!("child did not exit after SIGTERM, sending SIGKILL");
            if let Some(pid) = pid {
                signal_group(pid, Signal::Kill);
            }
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to SIGKILL child");
            }
        }
    }

    if let Some(pid) = pid {
        signal_group(pid, Signal::Kill);
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    let signo = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };

    // The child was spawned with process_group(0), so its pid is the pgid.
    let rc = unsafe { libc::kill(-pgid, signo) };
    if rc != 0 {
        debug!(
            pgid,
            signal = ?signal,
            error = %std::io::Error::last_os_error(),
            "signal not delivered"
        );
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}
