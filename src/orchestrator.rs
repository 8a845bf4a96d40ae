//! Top-level run: preflight, phases, result, reports.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfiguration;
use crate::error::{Error, Result};
use crate::executor::CommandRunner;
use crate::phase;
use crate::preflight::{assess_resources, EnvironmentValidator, ResourceSnapshot};
use crate::report::{ReportPaths, ReportSynthesizer, ReportThresholds};
use crate::result::{FailureReport, RunResult};
use crate::scheduler::Scheduler;

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Phases were attempted and reports written.
    Completed {
        result: RunResult,
        /// Report artifacts that were written successfully.
        reports: Vec<PathBuf>,
    },
    /// Preflight failed; no phase ran.
    Aborted {
        report: FailureReport,
        /// Where the failure report was written, if it could be.
        path: Option<PathBuf>,
    },
}

impl RunOutcome {
    /// 0 iff every attempted phase succeeded.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed { result, .. } => result.overall_status.exit_code(),
            RunOutcome::Aborted { .. } => 1,
        }
    }
}

/// Owns one run from preflight to reports.
pub struct Orchestrator {
    config: RunConfiguration,
    runner: Arc<dyn CommandRunner>,
    cancel: CancellationToken,
    paths: ReportPaths,
}

impl Orchestrator {
    pub fn new(config: RunConfiguration, runner: Arc<dyn CommandRunner>) -> Self {
        let paths = ReportPaths::under(&config.working_directory);
        Self {
            config,
            runner,
            cancel: CancellationToken::new(),
            paths,
        }
    }

    /// Uses `token` to interrupt the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn paths(&self) -> &ReportPaths {
        &self.paths
    }

    /// Runs preflight and every planned phase, then writes the reports.
    ///
    /// Only errors outside phases and reports are returned; a failed
    /// preflight is reported as [`RunOutcome::Aborted`].
    pub async fn run(&self) -> Result<RunOutcome> {
        let start_time = Utc::now();

        let validator = EnvironmentValidator::new(self.runner.as_ref(), &self.config);
        match validator.validate(&self.cancel).await {
            Ok(preflight) => {
                tracing::info!(warnings = preflight.warnings.len(), "preflight passed");
            }
            Err(Error::FatalPreflight(message)) => return Ok(self.abort(message)),
            Err(e) => return Err(e),
        }

        let plan = phase::plan(&self.config);
        tracing::info!(
            phases = plan.len(),
            bail = self.config.bail,
            coverage = self.config.coverage_enabled,
            "starting run"
        );

        let scheduler = Scheduler::new(self.runner.as_ref(), &self.config, self.cancel.clone());
        let schedule = scheduler.run(&plan).await?;

        let result = RunResult::from_ledger(
            start_time,
            schedule.ledger,
            schedule.coverage,
            schedule.cancelled,
        );
        tracing::info!(
            run_id = %result.run_id,
            status = %result.overall_status,
            phases = result.phases.len(),
            "run finished"
        );

        if let Err(e) = result.persist(&self.paths.results_json) {
            tracing::error!(path = %self.paths.results_json.display(), error = %e, "failed to persist run result");
        }
        self.clear_stale_failure_report();

        let synthesizer =
            ReportSynthesizer::new(self.paths.clone(), ReportThresholds::from_config(&self.config));
        let reports = synthesizer.write_all(&result);

        Ok(RunOutcome::Completed { result, reports })
    }

    fn abort(&self, message: String) -> RunOutcome {
        tracing::error!(error = %message, "preflight failed, aborting run");

        let mut report = FailureReport::new("fatal_preflight", message);
        report.warnings =
            assess_resources(&ResourceSnapshot::capture(&self.config.working_directory));

        let path = match report.persist(&self.paths.failure_report) {
            Ok(()) => Some(self.paths.failure_report.clone()),
            Err(e) => {
                tracing::error!(path = %self.paths.failure_report.display(), error = %e, "failed to write failure report");
                None
            }
        };
        RunOutcome::Aborted { report, path }
    }

    /// The failure report only describes aborted runs.
    fn clear_stale_failure_report(&self) {
        if self.paths.failure_report.is_file() {
            if let Err(e) = std::fs::remove_file(&self.paths.failure_report) {
                tracing::warn!(error = %e, "could not remove stale failure report");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fake::{Behavior, ScriptedRunner};
    use crate::phase::{PhaseStatus, PhaseType};
    use std::path::Path;
    use tempfile::TempDir;

    fn config(dir: &Path, types: &[PhaseType], bail: bool) -> RunConfiguration {
        let mut config = RunConfiguration::for_types(types.to_vec())
            .with_bail(bail)
            .with_working_directory(dir);
        for ty in types {
            config = config.with_phase_commands(*ty, vec![vec![format!("{}-suite", ty)]]);
        }
        config
    }

    fn node(version: &str) -> Behavior {
        Behavior::Exit(0, format!("{}\n", version))
    }

    fn completed(outcome: RunOutcome) -> (RunResult, Vec<PathBuf>) {
        match outcome {
            RunOutcome::Completed { result, reports } => (result, reports),
            RunOutcome::Aborted { report, .. } => panic!("run aborted: {}", report.message),
        }
    }

    #[tokio::test]
    async fn passing_unit_phase_exits_zero() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().on("node", node("v20.11.1")));
        let orchestrator =
            Orchestrator::new(config(dir.path(), &[PhaseType::Unit], true), runner.clone());

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome.exit_code(), 0);

        let (result, reports) = completed(outcome);
        assert_eq!(result.phases.len(), 1);
        assert_eq!(result.phases[0].status, PhaseStatus::Success);
        assert_eq!(reports.len(), 3);
        assert!(orchestrator.paths().results_json.is_file());
        assert!(dir.path().join("TEST_SUMMARY.md").is_file());
        assert_eq!(runner.calls(), ["node --version", "unit-suite"]);
    }

    #[tokio::test]
    async fn bail_on_unit_failure_skips_integration() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("node", node("v20.11.1"))
                .failing("unit-suite", 1),
        );
        let orchestrator = Orchestrator::new(
            config(dir.path(), &[PhaseType::Unit, PhaseType::Integration], true),
            runner.clone(),
        );

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome.exit_code(), 1);

        let (result, _) = completed(outcome);
        let names: Vec<_> = result.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["unit"]);
        assert!(result.phases[0].is_failed());

        let junit = std::fs::read_to_string(dir.path().join("coverage/junit.xml")).unwrap();
        assert_eq!(junit.matches("<testcase ").count(), 1);
        assert!(!runner.calls().contains(&"integration-suite".to_string()));
    }

    #[tokio::test]
    async fn runtime_below_floor_aborts_before_any_phase() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().on("node", node("v14.21.3")));
        let orchestrator = Orchestrator::new(
            config(dir.path(), &[PhaseType::Lint, PhaseType::Unit], false),
            runner.clone(),
        );

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome.exit_code(), 1);
        match &outcome {
            RunOutcome::Aborted { report, path } => {
                assert_eq!(report.kind, "fatal_preflight");
                assert!(report.message.contains("14.21.3"));
                assert_eq!(path.as_deref(), Some(orchestrator.paths().failure_report.as_path()));
            }
            other => panic!("expected abort, got {:?}", other),
        }

        assert!(dir.path().join("coverage/failure-report.json").is_file());
        assert!(!dir.path().join("TEST_SUMMARY.md").exists());
        assert_eq!(runner.calls(), ["node --version"]);
    }

    #[tokio::test]
    async fn completed_run_removes_stale_failure_report() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("coverage/failure-report.json");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "{}").unwrap();

        let runner = Arc::new(ScriptedRunner::new().on("node", node("v18.19.0")));
        let orchestrator =
            Orchestrator::new(config(dir.path(), &[PhaseType::Lint], false), runner);

        orchestrator.run().await.unwrap();
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn interrupted_run_still_writes_reports() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("node", node("v20.0.0"))
                .on("e2e-suite", Behavior::Sleep(std::time::Duration::from_secs(30)))
                .cancel_when("e2e-suite", token.clone()),
        );
        let orchestrator = Orchestrator::new(
            config(dir.path(), &[PhaseType::E2e, PhaseType::Security], false),
            runner,
        )
        .with_cancellation(token);

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome.exit_code(), 1);

        let (result, reports) = completed(outcome);
        assert!(result.cancelled);
        assert_eq!(result.phases.len(), 1);
        assert_eq!(reports.len(), 3);

        let summary = std::fs::read_to_string(dir.path().join("TEST_SUMMARY.md")).unwrap();
        assert!(summary.contains("interrupted"));
    }

    #[tokio::test]
    async fn persisted_result_matches_returned_result() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("node", node("v22.1.0"))
                .failing("security-suite", 1),
        );
        let orchestrator = Orchestrator::new(
            config(dir.path(), &[PhaseType::Lint, PhaseType::Security], false),
            runner,
        );

        let (result, _) = completed(orchestrator.run().await.unwrap());
        let json = std::fs::read_to_string(&orchestrator.paths().results_json).unwrap();
        let persisted: RunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(persisted, result);
    }
}
