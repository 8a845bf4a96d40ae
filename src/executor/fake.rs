//! Scripted runner for scheduler and orchestrator tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::PhaseError;
use crate::phase::CommandSpec;

use super::{CommandRunner, ExecOptions, SubprocessResult};

/// What a scripted command does.
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    /// Exit with the given code and stdout.
    Exit(i32, String),
    /// Sleep, then exit 0; honours timeout and cancellation.
    Sleep(Duration),
    /// Fail to spawn.
    Missing,
}

/// Runner that answers from a script keyed by program name.
///
/// Unscripted programs exit 0.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    script: HashMap<String, Behavior>,
    calls: Mutex<Vec<String>>,
    cancel_on: Option<(String, CancellationToken)>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, program: &str, behavior: Behavior) -> Self {
        self.script.insert(program.to_string(), behavior);
        self
    }

    pub(crate) fn failing(self, program: &str, code: i32) -> Self {
        self.on(program, Behavior::Exit(code, String::new()))
    }

    /// Cancels `token` when `program` starts, simulating an interrupt.
    pub(crate) fn cancel_when(mut self, program: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((program.to_string(), token));
        self
    }

    /// Command lines executed so far, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
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
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command_line.clone());
        }
        if let Some((program, token)) = &self.cancel_on {
            if *program == command.program {
                token.cancel();
            }
        }

        let behavior = self
            .script
            .get(&command.program)
            .cloned()
            .unwrap_or(Behavior::Exit(0, String::new()));

        match behavior {
            Behavior::Exit(0, stdout) => Ok(SubprocessResult {
                exit_code: 0,
                stdout,
                stderr: String::new(),
            }),
            Behavior::Exit(code, stdout) => Err(PhaseError::NonZeroExit {
                command: command_line,
                code: Some(code),
                tail: stdout,
            }),
            Behavior::Missing => Err(PhaseError::Spawn {
                command: command_line,
                reason: "No such file or directory (os error 2)".to_string(),
            }),
            Behavior::Sleep(duration) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(PhaseError::Cancelled { command: command_line }),
                    _ = tokio::time::sleep(options.timeout), if options.timeout < duration => {
                        Err(PhaseError::Timeout { command: command_line, timeout: options.timeout })
                    }
                    _ = tokio::time::sleep(duration) => Ok(SubprocessResult::default()),
                }
            }
        }
    }
}
