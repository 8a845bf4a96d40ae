//! Error types for phased test runs.

use std::time::Duration;

use thiserror::Error;

use crate::phase::PhaseStatus;

/// Top-level error type for a test run.
#[derive(Error, Debug)]
pub enum Error {
    /// A preflight requirement is unmet; the run aborts before any phase.
    #[error("preflight check failed: {0}")]
    FatalPreflight(String),

    /// A phase's unit of work failed.
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// One report artifact could not be written.
    #[error("failed to write {artifact} report: {reason}")]
    ReportGeneration { artifact: String, reason: String },

    /// A coverage artifact parsed but its counters are unusable.
    #[error("invalid coverage artifact: {0}")]
    InvalidArtifact(String),

    /// Configuration could not be resolved.
    #[error("configuration error: {0}")]
    Config(String),

    /// A phase name was recorded twice in one run.
    #[error("phase '{0}' is already recorded in this run")]
    DuplicatePhase(String),

    /// A phase record was moved backwards or completed twice.
    #[error("phase '{phase}' cannot move from {from} to {to}")]
    InvalidTransition {
        phase: String,
        from: PhaseStatus,
        to: PhaseStatus,
    },

    /// IO error while reading artifacts or writing reports.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single subprocess inside a phase.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseError {
    /// The process outlived its timeout and was terminated.
    #[error("`{command}` timed out after {}ms", timeout.as_millis())]
    Timeout { command: String, timeout: Duration },

    /// The process exited unsuccessfully.
    #[error("`{command}` exited with {}{}", exit_label(*code), tail_suffix(tail))]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        tail: String,
    },

    /// The process could not be started.
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// The run was interrupted while (or before) the process ran.
    #[error("cancelled by interrupt while running `{command}`")]
    Cancelled { command: String },
}

impl PhaseError {
    /// Returns true for the timeout subtype.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PhaseError::Timeout { .. })
    }

    /// Returns true when the failure came from an external interrupt.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PhaseError::Cancelled { .. })
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

fn tail_suffix(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {}", tail)
    }
}

/// Result type alias for test-run operations.
pub type Result<T> = std::result::Result<T, Error>;
