//! Insertion-ordered record of attempted phases.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

use super::{PhaseRecord, PhaseStatus};

/// Ordered, name-unique collection of phase records for one run.
///
/// Owned by a single writer (the scheduler). Order is the order phases were
/// started and drives report rendering.
#[derive(Debug, Clone, Default)]
pub struct PhaseLedger {
    records: Vec<PhaseRecord>,
}

impl PhaseLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a phase and returns its index.
    ///
    /// The record is created pending and moved to running immediately.
    pub fn start(
        &mut self,
        name: &str,
        description: &str,
        started_at: DateTime<Utc>,
    ) -> Result<usize> {
        if self.get(name).is_some() {
            return Err(Error::DuplicatePhase(name.to_string()));
        }

        let mut record = PhaseRecord::new(name, description, started_at);
        record.transition(PhaseStatus::Running)?;
        self.records.push(record);
        Ok(self.records.len() - 1)
    }

    /// Completes the running phase `name`.
    pub fn finish(
        &mut self,
        name: &str,
        outcome: PhaseStatus,
        elapsed: Duration,
        error_message: Option<String>,
    ) -> Result<&PhaseRecord> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::Config(format!("phase '{}' was never started", name)))?;

        record.transition(outcome)?;
        record.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        record.error_message = error_message;
        Ok(record)
    }

    /// Looks up a record by name.
    pub fn get(&self, name: &str) -> Option<&PhaseRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Records in start order.
    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if any recorded phase failed.
    pub fn has_failures(&self) -> bool {
        self.records.iter().any(PhaseRecord::is_failed)
    }

    /// Consumes the ledger, yielding records in start order.
    pub fn into_records(self) -> Vec<PhaseRecord> {
        self.records
    }
}
