//! Phasegate - phased test orchestration
//!
//! This library sequences a project's test phases (static analysis, unit,
//! integration, end-to-end, performance, accessibility, security, coverage,
//! reporting), runs each as a timeout-bounded subprocess, records the
//! outcome of every attempted phase under a bail policy, merges coverage
//! artifacts and renders HTML, Markdown and JUnit reports.

pub mod config;
pub mod coverage;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod phase;
pub mod preflight;
pub mod report;
pub mod result;
pub mod scheduler;

pub use config::{
    CliArgs, FileConfig, PhaseOverride, RunConfiguration, RuntimeRequirement, Validate,
    ValidationResult,
};
pub use coverage::{CoverageAggregator, CoverageDimension, CoverageMetric, CoverageSummary};
pub use error::{Error, PhaseError, Result};
pub use executor::{CommandRunner, ExecOptions, SubprocessResult, SystemRunner};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use phase::{CommandSpec, PhaseDefinition, PhaseLedger, PhaseRecord, PhaseStatus, PhaseType};
pub use preflight::{EnvironmentValidator, PreflightReport};
pub use report::{ReportPaths, ReportSynthesizer, ReportThresholds};
pub use result::{FailureReport, OverallStatus, RunResult};
pub use scheduler::{ScheduleOutcome, Scheduler};
