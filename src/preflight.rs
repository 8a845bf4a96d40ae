//! Preflight checks run before any phase.
//!
//! A runtime below the configured version floor aborts the run. Memory and
//! disk findings only produce warnings.

use std::path::Path;
use std::time::Duration;

use sysinfo::{Disks, System};
use tokio_util::sync::CancellationToken;

use crate::config::{RunConfiguration, RuntimeRequirement};
use crate::error::{Error, Result};
use crate::executor::{CommandRunner, ExecOptions};

/// Time allowed for the runtime version probe.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Warn below this much available memory.
pub const MIN_AVAILABLE_MEMORY: u64 = 512 * MIB;

/// Warn below this much free disk on the working directory's volume.
pub const MIN_AVAILABLE_DISK: u64 = GIB;

/// Outcome of a passing preflight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreflightReport {
    /// Detected runtime version, if a runtime check was configured.
    pub runtime_version: Option<semver::Version>,
    /// Advisory findings.
    pub warnings: Vec<String>,
}

/// Memory and disk figures in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub total_memory: u64,
    pub available_memory: u64,
    /// Free space on the volume holding the working directory, if found.
    pub available_disk: Option<u64>,
}

impl ResourceSnapshot {
    /// Reads current figures from the host.
    pub fn capture(working_dir: &Path) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        Self {
            total_memory: sys.total_memory(),
            available_memory: sys.available_memory(),
            available_disk: available_disk_for(working_dir),
        }
    }
}

/// Finds the disk whose mount point is the longest prefix of `dir`.
fn available_disk_for(dir: &Path) -> Option<u64> {
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| dir.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Turns a resource snapshot into advisory warnings.
pub fn assess_resources(snapshot: &ResourceSnapshot) -> Vec<String> {
    let mut warnings = Vec::new();

    if snapshot.total_memory > 0 {
        let low_share = snapshot.available_memory < snapshot.total_memory / 10;
        if low_share || snapshot.available_memory < MIN_AVAILABLE_MEMORY {
            warnings.push(format!(
                "low memory: {} MiB available of {} MiB",
                snapshot.available_memory / MIB,
                snapshot.total_memory / MIB
            ));
        }
    }

    if let Some(disk) = snapshot.available_disk {
        if disk < MIN_AVAILABLE_DISK {
            warnings.push(format!(
                "low disk space: {} MiB available in the working directory",
                disk / MIB
            ));
        }
    }

    warnings
}

/// Extracts the first version-like token from `raw`.
///
/// Accepts a leading `v` and fills a missing minor or patch with 0, so
/// `v20.11.1`, `20.11` and `20` all parse. Pre-release and build suffixes
/// are ignored.
pub fn parse_version(raw: &str) -> Option<semver::Version> {
    raw.split_whitespace().find_map(|token| {
        let token = token.trim_start_matches(|c: char| c == 'v' || c == 'V');
        let numeric: String = token
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let numeric = numeric.trim_end_matches('.');
        if numeric.is_empty() {
            return None;
        }

        let parts = numeric
            .split('.')
            .map(str::parse::<u64>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .ok()?;
        match parts.as_slice() {
            [major] => Some(semver::Version::new(*major, 0, 0)),
            [major, minor] => Some(semver::Version::new(*major, *minor, 0)),
            [major, minor, patch, ..] => Some(semver::Version::new(*major, *minor, *patch)),
            [] => None,
        }
    })
}

/// Runs the preflight checks for one run.
pub struct EnvironmentValidator<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a RunConfiguration,
}

impl<'a> EnvironmentValidator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a RunConfiguration) -> Self {
        Self { runner, config }
    }

    /// Checks the runtime floor, then host resources.
    ///
    /// Fails with [`Error::FatalPreflight`] only for the runtime floor.
    pub async fn validate(&self, cancel: &CancellationToken) -> Result<PreflightReport> {
        let runtime_version = match &self.config.runtime {
            Some(requirement) => Some(self.check_runtime(requirement, cancel).await?),
            None => {
                tracing::debug!("runtime version check disabled");
                None
            }
        };

        let snapshot = ResourceSnapshot::capture(&self.config.working_directory);
        let warnings = assess_resources(&snapshot);
        for warning in &warnings {
            tracing::warn!(warning = %warning, "preflight warning");
        }

        Ok(PreflightReport {
            runtime_version,
            warnings,
        })
    }

    async fn check_runtime(
        &self,
        requirement: &RuntimeRequirement,
        cancel: &CancellationToken,
    ) -> Result<semver::Version> {
        let command = requirement.command.display();
        let options = ExecOptions::new(VERSION_PROBE_TIMEOUT)
            .with_working_dir(&self.config.working_directory)
            .with_kill_grace(self.config.kill_grace);

        let output = self
            .runner
            .execute(&requirement.command, &options, cancel)
            .await
            .map_err(|e| Error::FatalPreflight(format!("could not determine runtime version: {}", e)))?;

        let version = parse_version(&output.stdout)
            .or_else(|| parse_version(&output.stderr))
            .ok_or_else(|| {
                Error::FatalPreflight(format!(
                    "`{}` printed no version: {:?}",
                    command,
                    output.stdout.trim()
                ))
            })?;

        if version < requirement.min_version {
            return Err(Error::FatalPreflight(format!(
                "runtime {} is below the required {} (from `{}`)",
                version, requirement.min_version, command
            )));
        }

        tracing::info!(version = %version, minimum = %requirement.min_version, "runtime version ok");
        Ok(version)
    }
}
