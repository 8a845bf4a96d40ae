//! Run result model persisted at the end of every run.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coverage::CoverageSummary;
use crate::error::Result;
use crate::phase::{PhaseLedger, PhaseRecord};

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Success,
    Failed,
}

impl OverallStatus {
    /// Process exit code for this status.
    pub fn exit_code(&self) -> i32 {
        match self {
            OverallStatus::Success => 0,
            OverallStatus::Failed => 1,
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Success => f.write_str("success"),
            OverallStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub start_time: DateTime<Utc>,
    /// Attempted phases in start order.
    pub phases: Vec<PhaseRecord>,
    /// Present only when coverage was enabled and its phase succeeded.
    pub coverage: Option<CoverageSummary>,
    /// Failed iff any phase failed.
    pub overall_status: OverallStatus,
    /// The run was interrupted before all phases were attempted.
    #[serde(default)]
    pub cancelled: bool,
}

impl RunResult {
    /// Builds the result from a finished ledger.
    pub fn from_ledger(
        start_time: DateTime<Utc>,
        ledger: PhaseLedger,
        coverage: Option<CoverageSummary>,
        cancelled: bool,
    ) -> Self {
        let overall_status = if ledger.has_failures() {
            OverallStatus::Failed
        } else {
            OverallStatus::Success
        };

        Self {
            run_id: Uuid::new_v4(),
            start_time,
            phases: ledger.into_records(),
            coverage,
            overall_status,
            cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        self.overall_status == OverallStatus::Success
    }

    pub fn failed_phases(&self) -> impl Iterator<Item = &PhaseRecord> {
        self.phases.iter().filter(|p| p.is_failed())
    }

    /// Sum of phase durations in milliseconds.
    pub fn total_duration_ms(&self) -> u64 {
        self.phases.iter().map(|p| p.duration_ms).sum()
    }

    /// Writes the result as pretty JSON, creating parent directories.
    pub fn persist(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

/// Written when preflight aborts the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl FailureReport {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            timestamp: Utc::now(),
            warnings: Vec::new(),
        }
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
