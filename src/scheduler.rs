//! Sequential phase scheduler.
//!
//! Phases run strictly one after another in plan order. Each phase is
//! recorded in the ledger when it starts and completed exactly once when it
//! ends; failures never escape a phase.

use std::io::Write;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfiguration;
use crate::coverage::{CoverageAggregator, CoverageSummary};
use crate::error::{PhaseError, Result};
use crate::executor::{CommandRunner, ExecOptions};
use crate::phase::{PhaseDefinition, PhaseLedger, PhaseStatus, PhaseType};

/// Longest error message kept in a phase record.
pub const MAX_ERROR_MESSAGE: usize = 500;

/// Longest error message written to the log.
pub const MAX_LOG_MESSAGE: usize = 200;

/// What the scheduler hands back after the last attempted phase.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOutcome {
    pub ledger: PhaseLedger,
    /// Merged coverage, when the coverage phase ran and succeeded.
    pub coverage: Option<CoverageSummary>,
    /// An interrupt stopped the run.
    pub cancelled: bool,
}

/// Drives a phase plan through a [`CommandRunner`].
pub struct Scheduler<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a RunConfiguration,
    cancel: CancellationToken,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        config: &'a RunConfiguration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            config,
            cancel,
        }
    }

    /// Runs `phases` in order.
    ///
    /// With `bail` set, the first failure ends the run and later phases are
    /// never recorded. An interrupt ends the run regardless of `bail`.
    pub async fn run(&self, phases: &[PhaseDefinition]) -> Result<ScheduleOutcome> {
        let mut outcome = ScheduleOutcome::default();
        let total = phases.len();
        let mut index = 0;

        while index < total {
            let phase = &phases[index];
            index += 1;

            outcome
                .ledger
                .start(&phase.name, &phase.description, Utc::now())?;
            tracing::info!(
                phase = %phase.name,
                steps = phase.steps.len(),
                timeout_ms = phase.timeout.as_millis() as u64,
                "phase started"
            );
            progress(&format!("[{}/{}] {}: {}", index, total, phase.name, phase.description));

            let clock = Instant::now();
            let result = self.run_phase(phase).await;
            let elapsed = clock.elapsed();

            match result {
                Ok(()) => {
                    outcome
                        .ledger
                        .finish(&phase.name, PhaseStatus::Success, elapsed, None)?;
                    tracing::info!(
                        phase = %phase.name,
                        duration_ms = elapsed.as_millis() as u64,
                        "phase succeeded"
                    );
                    progress(&format!(
                        "[{}/{}] {} passed in {:.2}s",
                        index,
                        total,
                        phase.name,
                        elapsed.as_secs_f64()
                    ));

                    if phase.phase_type == PhaseType::Coverage {
                        outcome.coverage = self.aggregate_coverage();
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    outcome.ledger.finish(
                        &phase.name,
                        PhaseStatus::Failed,
                        elapsed,
                        Some(truncate(&message, MAX_ERROR_MESSAGE)),
                    )?;
                    tracing::error!(
                        phase = %phase.name,
                        duration_ms = elapsed.as_millis() as u64,
                        timeout = e.is_timeout(),
                        error = %truncate(&message, MAX_LOG_MESSAGE),
                        "phase failed"
                    );
                    progress(&format!(
                        "[{}/{}] {} failed in {:.2}s",
                        index,
                        total,
                        phase.name,
                        elapsed.as_secs_f64()
                    ));

                    if e.is_cancelled() {
                        tracing::warn!(
                            remaining = total - index,
                            "run interrupted, not starting remaining phases"
                        );
                        outcome.cancelled = true;
                        break;
                    }
                    if self.config.bail {
                        tracing::warn!(
                            phase = %phase.name,
                            remaining = total - index,
                            "bailing after failed phase"
                        );
                        break;
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            outcome.cancelled = true;
        }
        Ok(outcome)
    }

    /// Runs each step of `phase` against one shared deadline.
    async fn run_phase(&self, phase: &PhaseDefinition) -> std::result::Result<(), PhaseError> {
        let deadline = Instant::now() + phase.timeout;

        for step in &phase.steps {
            let command = step.display();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PhaseError::Timeout {
                    command,
                    timeout: phase.timeout,
                });
            }

            tracing::debug!(phase = %phase.name, command = %command, "running step");
            self.runner
                .execute(step, &self.exec_options(remaining), &self.cancel)
                .await
                .map_err(|e| match e {
                    PhaseError::Timeout { command, .. } => PhaseError::Timeout {
                        command,
                        timeout: phase.timeout,
                    },
                    other => other,
                })?;
        }
        Ok(())
    }

    fn exec_options(&self, timeout: Duration) -> ExecOptions {
        let capture = !self.config.verbose_output;
        let mut options = ExecOptions::new(timeout)
            .with_working_dir(&self.config.working_directory)
            .with_kill_grace(self.config.kill_grace)
            .with_capture_output(capture)
            .with_env("NODE_ENV", "test");
        if capture {
            options = options.with_env("FORCE_COLOR", "0");
        }
        options
    }

    fn aggregate_coverage(&self) -> Option<CoverageSummary> {
        let artifacts = self
            .config
            .coverage_artifacts
            .iter()
            .map(|path| self.config.resolve_path(path));
        CoverageAggregator::new(artifacts).aggregate()
    }
}

/// Writes one progress line and flushes the console.
fn progress(line: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", line);
    let _ = stdout.flush();
}

/// Truncates `text` to at most `max` characters, marking the cut.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
