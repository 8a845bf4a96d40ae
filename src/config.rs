//! Run configuration: CLI flags, the optional TOML file, and validation.
//!
//! Configuration is resolved once at startup into an immutable
//! [`RunConfiguration`]. Unknown flags, file keys and phase names are
//! rejected rather than ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::phase::{CommandSpec, PhaseType};

/// File name looked up in the working directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "phasegate.toml";

/// Default coverage floor for recommendations (percent).
pub const DEFAULT_COVERAGE_THRESHOLD: f64 = 80.0;

/// Default slow-phase threshold for recommendations.
pub const DEFAULT_SLOW_PHASE: Duration = Duration::from_secs(60);

/// Default grace period between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Default artifact consumed by the coverage aggregator.
pub const DEFAULT_COVERAGE_ARTIFACT: &str = "coverage/coverage-summary.json";

/// Default minimum runtime version.
pub const DEFAULT_MIN_RUNTIME_VERSION: &str = "18.0.0";

/// Command-line arguments.
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "phasegate",
    about = "Run the project's test phases in order and report the results",
    version
)]
pub struct CliArgs {
    /// Stop at the first failing phase
    #[arg(long)]
    pub bail: bool,

    /// Skip coverage collection and the coverage phase
    #[arg(long)]
    pub no_coverage: bool,

    /// Stream subprocess output and log at debug level
    #[arg(long)]
    pub verbose: bool,

    /// Let phases that default to serial execution use the worker pool
    #[arg(long)]
    pub parallel: bool,

    /// Maximum workers handed to each phase's test runner
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Timeout applied to every phase, in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Comma-separated phase types to run, in order
    #[arg(long, value_delimiter = ',', conflicts_with = "phase")]
    pub types: Vec<String>,

    /// Run a single phase type
    #[arg(value_name = "PHASE")]
    pub phase: Option<String>,

    /// Path to a phasegate.toml configuration file
    #[arg(long, env = "PHASEGATE_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Working directory for subprocesses and artifacts
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,
}

/// Contents of `phasegate.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bail: Option<bool>,
    pub verbose: Option<bool>,
    pub parallel: Option<bool>,
    pub workers: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub kill_grace_ms: Option<u64>,
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub coverage: CoverageFileConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    pub runtime: Option<RuntimeFileConfig>,
    /// Per-phase overrides keyed by phase name.
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseOverride>,
}

/// `[coverage]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoverageFileConfig {
    pub enabled: Option<bool>,
    pub artifacts: Option<Vec<PathBuf>>,
}

/// `[thresholds]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdsConfig {
    /// Coverage floor in percent.
    pub coverage: Option<f64>,
    /// Phases slower than this are flagged in recommendations.
    pub slow_phase_secs: Option<u64>,
}

/// `[runtime]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub min_version: Option<String>,
}

fn default_true() -> bool {
    true
}

/// `[phases.<type>]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseOverride {
    /// Timeout for this phase in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Replacement steps, each an argv list.
    pub commands: Option<Vec<Vec<String>>>,
}

impl FileConfig {
    /// Loads a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Minimum version of the runtime the external suites need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeRequirement {
    /// Command that prints the runtime version.
    pub command: CommandSpec,
    /// Lowest acceptable version.
    pub min_version: semver::Version,
}

impl Default for RuntimeRequirement {
    fn default() -> Self {
        Self {
            command: CommandSpec::new("node", ["--version"]),
            min_version: semver::Version::new(18, 0, 0),
        }
    }
}

/// Fully resolved, immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    /// Stop after the first failing phase.
    pub bail: bool,
    pub coverage_enabled: bool,
    pub parallelism_hint: bool,
    pub verbose_output: bool,
    /// Phases to run, in order, without duplicates.
    pub selected_phase_types: Vec<PhaseType>,
    /// Worker budget for each phase's own subprocess (≥1).
    pub max_workers: usize,
    /// Overrides every phase's own timeout when set.
    pub per_phase_timeout: Option<Duration>,
    pub working_directory: PathBuf,
    /// Grace period between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    /// Coverage floor in percent for recommendations.
    pub coverage_threshold: f64,
    pub slow_phase_threshold: Duration,
    /// Coverage summaries merged by the aggregator, relative to the working directory.
    pub coverage_artifacts: Vec<PathBuf>,
    /// `None` disables the runtime version check.
    pub runtime: Option<RuntimeRequirement>,
    pub phase_overrides: BTreeMap<PhaseType, PhaseOverride>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self::for_types(PhaseType::ALL.to_vec())
    }
}

impl RunConfiguration {
    /// Creates a configuration with defaults for the given phases.
    pub fn for_types(types: Vec<PhaseType>) -> Self {
        Self {
            bail: false,
            coverage_enabled: true,
            parallelism_hint: false,
            verbose_output: false,
            selected_phase_types: dedupe(types),
            max_workers: default_workers(),
            per_phase_timeout: None,
            working_directory: PathBuf::from("."),
            kill_grace: DEFAULT_KILL_GRACE,
            coverage_threshold: DEFAULT_COVERAGE_THRESHOLD,
            slow_phase_threshold: DEFAULT_SLOW_PHASE,
            coverage_artifacts: vec![PathBuf::from(DEFAULT_COVERAGE_ARTIFACT)],
            runtime: Some(RuntimeRequirement::default()),
            phase_overrides: BTreeMap::new(),
        }
    }

    /// Sets the bail policy.
    pub fn with_bail(mut self, bail: bool) -> Self {
        self.bail = bail;
        self
    }

    /// Sets the worker budget.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Sets the working directory.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    /// Sets or clears the runtime requirement.
    pub fn with_runtime(mut self, runtime: Option<RuntimeRequirement>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Replaces the steps of one phase.
    pub fn with_phase_commands(mut self, phase: PhaseType, commands: Vec<Vec<String>>) -> Self {
        self.phase_overrides.entry(phase).or_default().commands = Some(commands);
        self
    }

    /// Sets the timeout of one phase.
    pub fn with_phase_timeout(mut self, phase: PhaseType, timeout: Duration) -> Self {
        self.phase_overrides.entry(phase).or_default().timeout_ms =
            Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Resolves configuration from CLI arguments and the configuration file.
    pub fn resolve(args: CliArgs) -> Result<Self> {
        let working_directory = match &args.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };

        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => {
                let candidate = working_directory.join(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    FileConfig::load(&candidate)?
                } else {
                    FileConfig::default()
                }
            }
        };

        let config = Self::from_parts(args, file, working_directory)?;
        for warning in config.validate().into_result()? {
            tracing::warn!(warning = %warning, "configuration warning");
        }
        Ok(config)
    }

    /// Merges CLI arguments over file values over defaults.
    ///
    /// Does not validate; see [`Validate`].
    pub fn from_parts(args: CliArgs, file: FileConfig, working_directory: PathBuf) -> Result<Self> {
        let type_names: Vec<String> = if let Some(phase) = args.phase {
            vec![phase]
        } else if !args.types.is_empty() {
            args.types
        } else if let Some(types) = file.types {
            types
        } else {
            PhaseType::ALL.iter().map(|t| t.as_str().to_string()).collect()
        };

        let types = type_names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::parse::<PhaseType>)
            .collect::<Result<Vec<_>>>()?;

        let mut phase_overrides = BTreeMap::new();
        for (name, phase_override) in file.phases {
            phase_overrides.insert(name.parse::<PhaseType>()?, phase_override);
        }

        let runtime = match file.runtime {
            None => Some(RuntimeRequirement::default()),
            Some(runtime) if !runtime.enabled => None,
            Some(runtime) => Some(resolve_runtime(runtime)?),
        };

        let mut config = Self::for_types(types);
        config.bail = args.bail || file.bail.unwrap_or(false);
        config.coverage_enabled = !args.no_coverage && file.coverage.enabled.unwrap_or(true);
        config.parallelism_hint = args.parallel || file.parallel.unwrap_or(false);
        config.verbose_output = args.verbose || file.verbose.unwrap_or(false);
        config.max_workers = args.workers.or(file.workers).unwrap_or(config.max_workers);
        config.per_phase_timeout = args
            .timeout
            .or(file.timeout_ms)
            .map(Duration::from_millis);
        config.working_directory = working_directory;
        if let Some(ms) = file.kill_grace_ms {
            config.kill_grace = Duration::from_millis(ms);
        }
        if let Some(pct) = file.thresholds.coverage {
            config.coverage_threshold = pct;
        }
        if let Some(secs) = file.thresholds.slow_phase_secs {
            config.slow_phase_threshold = Duration::from_secs(secs);
        }
        if let Some(artifacts) = file.coverage.artifacts {
            config.coverage_artifacts = artifacts;
        }
        config.runtime = runtime;
        config.phase_overrides = phase_overrides;
        Ok(config)
    }

    /// Resolves `path` against the working directory.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_directory.join(path)
        }
    }
}

fn resolve_runtime(runtime: RuntimeFileConfig) -> Result<RuntimeRequirement> {
    let defaults = RuntimeRequirement::default();
    let command = match runtime.command {
        Some(program) => CommandSpec::new(program, runtime.args.unwrap_or_default()),
        None => defaults.command,
    };
    let min_version = match runtime.min_version {
        Some(raw) => crate::preflight::parse_version(&raw).ok_or_else(|| {
            Error::Config(format!("runtime.min_version '{}' is not a version", raw))
        })?,
        None => defaults.min_version,
    };
    Ok(RuntimeRequirement {
        command,
        min_version,
    })
}

fn dedupe(types: Vec<PhaseType>) -> Vec<PhaseType> {
    let mut seen = Vec::with_capacity(types.len());
    for ty in types {
        if !seen.contains(&ty) {
            seen.push(ty);
        }
    }
    seen
}

/// Half the available cores, at least one.
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for RunConfiguration {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.selected_phase_types.is_empty() {
            result.add_error("no phase types selected");
        }

        if self.max_workers == 0 {
            result.add_error("workers must be at least 1");
        } else if self.max_workers > 64 {
            result.add_warning(format!(
                "{} workers per phase may exhaust memory",
                self.max_workers
            ));
        }

        match self.per_phase_timeout {
            Some(timeout) if timeout.is_zero() => result.add_error("timeout must be at least 1ms"),
            Some(timeout) if timeout < Duration::from_secs(1) => result.add_warning(format!(
                "timeout of {}ms will likely cut phases short",
                timeout.as_millis()
            )),
            _ => {}
        }

        if !(0.0..=100.0).contains(&self.coverage_threshold) {
            result.add_error(format!(
                "coverage threshold {} is outside 0-100",
                self.coverage_threshold
            ));
        }

        for (phase, phase_override) in &self.phase_overrides {
            if phase_override.timeout_ms == Some(0) {
                result.add_error(format!("phases.{}.timeout_ms must be at least 1", phase));
            }
            if let Some(commands) = &phase_override.commands {
                if commands.is_empty() || commands.iter().any(|argv| argv.is_empty()) {
                    result.add_error(format!("phases.{}.commands must not be empty", phase));
                }
            }
            if !self.selected_phase_types.contains(phase) {
                result.add_warning(format!("phases.{} is configured but not selected", phase));
            }
        }

        if self.coverage_enabled && self.coverage_artifacts.is_empty() {
            result.add_warning("coverage is enabled but no coverage artifacts are configured");
        }

        result
    }
}
