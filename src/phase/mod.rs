//! Phase model: phase types, records, and the default phase catalog.

pub mod ledger;

pub use ledger::PhaseLedger;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RunConfiguration;
use crate::error::{Error, Result};

/// One orderable kind of work in a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseType {
    /// Static analysis: type checker, linter, format checker.
    Lint,
    Unit,
    Integration,
    E2e,
    Performance,
    Accessibility,
    Security,
    /// Coverage merge and summary.
    Coverage,
    /// Performance report generation.
    Reporting,
}

impl PhaseType {
    /// Every phase type in canonical run order.
    pub const ALL: [PhaseType; 9] = [
        PhaseType::Lint,
        PhaseType::Unit,
        PhaseType::Integration,
        PhaseType::E2e,
        PhaseType::Performance,
        PhaseType::Accessibility,
        PhaseType::Security,
        PhaseType::Coverage,
        PhaseType::Reporting,
    ];

    /// Returns the phase name used as the ledger key.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseType::Lint => "lint",
            PhaseType::Unit => "unit",
            PhaseType::Integration => "integration",
            PhaseType::E2e => "e2e",
            PhaseType::Performance => "performance",
            PhaseType::Accessibility => "accessibility",
            PhaseType::Security => "security",
            PhaseType::Coverage => "coverage",
            PhaseType::Reporting => "reporting",
        }
    }

    /// Human-readable description shown in reports.
    pub fn description(&self) -> &'static str {
        match self {
            PhaseType::Lint => "Static analysis (type check, lint, format)",
            PhaseType::Unit => "Unit tests",
            PhaseType::Integration => "Integration tests",
            PhaseType::E2e => "End-to-end tests",
            PhaseType::Performance => "Performance benchmarks",
            PhaseType::Accessibility => "Accessibility compliance",
            PhaseType::Security => "Dependency vulnerability audit",
            PhaseType::Coverage => "Coverage merge and summary",
            PhaseType::Reporting => "Performance report generation",
        }
    }

    /// Default timeout for this phase.
    ///
    /// Browser-driven and benchmark phases get the longest timeouts; static
    /// analysis the shortest.
    pub fn default_timeout(&self) -> Duration {
        let secs = match self {
            PhaseType::Lint => 120,
            PhaseType::Unit => 300,
            PhaseType::Integration => 600,
            PhaseType::E2e => 1800,
            PhaseType::Performance => 1800,
            PhaseType::Accessibility => 600,
            PhaseType::Security => 300,
            PhaseType::Coverage => 300,
            PhaseType::Reporting => 120,
        };
        Duration::from_secs(secs)
    }

    /// Returns true for phases driven by the test-framework runner.
    pub fn is_test_runner_phase(&self) -> bool {
        matches!(
            self,
            PhaseType::Unit | PhaseType::Integration | PhaseType::E2e
        )
    }
}

impl fmt::Display for PhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        PhaseType::ALL
            .iter()
            .copied()
            .find(|ty| ty.as_str() == wanted)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown phase type '{}' (expected one of: {})",
                    s.trim(),
                    PhaseType::ALL.map(|ty| ty.as_str()).join(", ")
                ))
            })
    }
}

/// Lifecycle state of a phase record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl PhaseStatus {
    /// Returns true once the phase has finished either way.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Success | PhaseStatus::Failed)
    }

    fn can_move_to(&self, next: PhaseStatus) -> bool {
        matches!(
            (self, next),
            (PhaseStatus::Pending, PhaseStatus::Running)
                | (PhaseStatus::Running, PhaseStatus::Success)
                | (PhaseStatus::Running, PhaseStatus::Failed)
        )
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Success => "success",
            PhaseStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Record of one attempted phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Unique phase name within the run.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Current lifecycle state.
    pub status: PhaseStatus,
    /// When the phase started.
    pub started_at: DateTime<Utc>,
    /// Elapsed wall time, set on completion.
    pub duration_ms: u64,
    /// Truncated failure message, set when the phase failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PhaseRecord {
    /// Creates a pending record.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: PhaseStatus::Pending,
            started_at,
            duration_ms: 0,
            error_message: None,
        }
    }

    /// Moves the record forward to `next`.
    ///
    /// Only pending → running → success|failed is allowed.
    pub fn transition(&mut self, next: PhaseStatus) -> Result<()> {
        if !self.status.can_move_to(next) {
            return Err(Error::InvalidTransition {
                phase: self.name.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Duration as a [`Duration`].
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn is_failed(&self) -> bool {
        self.status == PhaseStatus::Failed
    }
}

/// One external command inside a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to run (resolved through `PATH`).
    pub program: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Creates a command spec from a program and arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a command spec from an argv-style list.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }

    /// Returns the command line as shown in logs and messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// A resolved phase: what to run and how long it may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDefinition {
    pub phase_type: PhaseType,
    pub name: String,
    pub description: String,
    /// Steps executed in order against one deadline.
    pub steps: Vec<CommandSpec>,
    pub timeout: Duration,
}

impl PhaseDefinition {
    /// Resolves the definition of `phase_type` under `config`.
    ///
    /// Overrides from the configuration file replace the default steps and
    /// timeout; a global `--timeout` wins over both timeouts.
    pub fn resolve(phase_type: PhaseType, config: &RunConfiguration) -> Self {
        let overrides = config.phase_overrides.get(&phase_type);

        let steps = overrides
            .and_then(|o| o.commands.as_ref())
            .map(|commands| commands.iter().filter_map(|c| CommandSpec::from_argv(c)).collect())
            .unwrap_or_else(|| default_steps(phase_type, config));

        let timeout = config
            .per_phase_timeout
            .or_else(|| overrides.and_then(|o| o.timeout_ms).map(Duration::from_millis))
            .unwrap_or_else(|| phase_type.default_timeout());

        Self {
            phase_type,
            name: phase_type.as_str().to_string(),
            description: phase_type.description().to_string(),
            steps,
            timeout,
        }
    }
}

/// Builds the ordered phase plan for a run.
pub fn plan(config: &RunConfiguration) -> Vec<PhaseDefinition> {
    config
        .selected_phase_types
        .iter()
        .filter(|ty| config.coverage_enabled || **ty != PhaseType::Coverage)
        .map(|ty| PhaseDefinition::resolve(*ty, config))
        .collect()
}

fn default_steps(phase_type: PhaseType, config: &RunConfiguration) -> Vec<CommandSpec> {
    match phase_type {
        PhaseType::Lint => vec![
            CommandSpec::new("npx", ["tsc", "--noEmit"]),
            CommandSpec::new("npx", ["eslint", ".", "--max-warnings=0"]),
            CommandSpec::new("npx", ["prettier", "--check", "."]),
        ],
        PhaseType::Unit | PhaseType::Integration | PhaseType::E2e => {
            vec![test_runner_step(phase_type, config)]
        }
        PhaseType::Performance => vec![CommandSpec::new("npm", ["run", "test:performance"])],
        PhaseType::Accessibility => vec![
            CommandSpec::new("npm", ["run", "test:accessibility"]),
            CommandSpec::new("npm", ["run", "validate:wcag"]),
        ],
        PhaseType::Security => vec![CommandSpec::new("npm", ["audit", "--audit-level=high"])],
        PhaseType::Coverage => vec![
            CommandSpec::new(
                "npx",
                [
                    "nyc",
                    "merge",
                    "coverage/.nyc_output",
                    "coverage/merged/coverage-final.json",
                ],
            ),
            CommandSpec::new(
                "npx",
                [
                    "nyc",
                    "report",
                    "--temp-dir",
                    "coverage/merged",
                    "--reporter=json-summary",
                    "--reporter=lcov",
                    "--report-dir",
                    "coverage",
                ],
            ),
        ],
        PhaseType::Reporting => vec![CommandSpec::new("npm", ["run", "performance:report"])],
    }
}

fn test_runner_step(phase_type: PhaseType, config: &RunConfiguration) -> CommandSpec {
    let mut args = vec![
        "jest".to_string(),
        "--selectProjects".to_string(),
        phase_type.as_str().to_string(),
        "--passWithNoTests".to_string(),
    ];

    // Integration suites share external fixtures; serialize them unless the
    // caller opted into parallel execution.
    if phase_type == PhaseType::Integration && !config.parallelism_hint {
        args.push("--runInBand".to_string());
    } else {
        args.push(format!("--maxWorkers={}", config.max_workers));
    }

    if config.coverage_enabled {
        args.push("--coverage".to_string());
        args.push("--coverageDirectory".to_string());
        args.push(format!("coverage/{}", phase_type.as_str()));
    }

    if config.verbose_output {
        args.push("--verbose".to_string());
    }

    CommandSpec::new("npx", args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhaseOverride;

    #[test]
    fn phase_type_parses_case_insensitively() {
        assert_eq!("unit".parse::<PhaseType>().unwrap(), PhaseType::Unit);
        assert_eq!(" E2E ".parse::<PhaseType>().unwrap(), PhaseType::E2e);
        assert!(matches!(
            "smoke".parse::<PhaseType>(),
            Err(Error::Config(msg)) if msg.contains("smoke")
        ));
    }

    #[test]
    fn lint_timeout_is_shorter_than_browser_phases() {
        assert!(PhaseType::Lint.default_timeout() < PhaseType::E2e.default_timeout());
        assert!(PhaseType::Lint.default_timeout() < PhaseType::Performance.default_timeout());
    }

    #[test]
    fn record_moves_forward_exactly_once() {
        let mut record = PhaseRecord::new("unit", "Unit tests", Utc::now());
        assert_eq!(record.status, PhaseStatus::Pending);

        record.transition(PhaseStatus::Running).unwrap();
        record.transition(PhaseStatus::Failed).unwrap();

        let err = record.transition(PhaseStatus::Success).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(record.transition(PhaseStatus::Running).is_err());
        assert_eq!(record.status, PhaseStatus::Failed);
    }

    #[test]
    fn record_cannot_skip_running() {
        let mut record = PhaseRecord::new("lint", "Static analysis", Utc::now());
        assert!(record.transition(PhaseStatus::Success).is_err());
    }

    #[test]
    fn unit_step_carries_workers_and_coverage() {
        let config = RunConfiguration::for_types(vec![PhaseType::Unit]).with_max_workers(3);
        let def = PhaseDefinition::resolve(PhaseType::Unit, &config);

        assert_eq!(def.steps.len(), 1);
        let args = &def.steps[0].args;
        assert!(args.contains(&"--maxWorkers=3".to_string()));
        assert!(args.contains(&"--passWithNoTests".to_string()));
        assert!(args.contains(&"coverage/unit".to_string()));
        assert_eq!(def.timeout, Duration::from_secs(300));
    }

    #[test]
    fn integration_runs_in_band_without_parallel_hint() {
        let mut config = RunConfiguration::for_types(vec![PhaseType::Integration]);
        config.coverage_enabled = false;
        let def = PhaseDefinition::resolve(PhaseType::Integration, &config);

        let args = &def.steps[0].args;
        assert!(args.contains(&"--runInBand".to_string()));
        assert!(!args.iter().any(|a| a == "--coverage"));

        config.parallelism_hint = true;
        let def = PhaseDefinition::resolve(PhaseType::Integration, &config);
        assert!(def.steps[0].args.iter().any(|a| a.starts_with("--maxWorkers=")));
    }

    #[test]
    fn global_timeout_beats_phase_override() {
        let mut config = RunConfiguration::for_types(vec![PhaseType::Lint]);
        config.phase_overrides.insert(
            PhaseType::Lint,
            PhaseOverride {
                timeout_ms: Some(5_000),
                commands: Some(vec![vec!["true".to_string()]]),
            },
        );

        let def = PhaseDefinition::resolve(PhaseType::Lint, &config);
        assert_eq!(def.timeout, Duration::from_millis(5_000));
        assert_eq!(def.steps, vec![CommandSpec::new("true", Vec::<String>::new())]);

        config.per_phase_timeout = Some(Duration::from_millis(1_000));
        let def = PhaseDefinition::resolve(PhaseType::Lint, &config);
        assert_eq!(def.timeout, Duration::from_millis(1_000));
    }

    #[test]
    fn plan_drops_coverage_phase_when_disabled() {
        let mut config = RunConfiguration::for_types(vec![
            PhaseType::Unit,
            PhaseType::Coverage,
            PhaseType::Reporting,
        ]);
        let names: Vec<_> = plan(&config).into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["unit", "coverage", "reporting"]);

        config.coverage_enabled = false;
        let names: Vec<_> = plan(&config).into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["unit", "reporting"]);
    }

    #[test]
    fn command_display_joins_arguments() {
        let cmd = CommandSpec::new("npm", ["audit", "--audit-level=high"]);
        assert_eq!(cmd.display(), "npm audit --audit-level=high");
        assert_eq!(CommandSpec::new("true", Vec::<String>::new()).display(), "true");
    }
}
