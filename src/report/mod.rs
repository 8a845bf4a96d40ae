//! Report synthesis.
//!
//! Every artifact is rendered from scratch out of a [`RunResult`] and written
//! to a fixed path, replacing the previous run's copy. A failure writing one
//! artifact is logged and does not stop the others.

pub mod html;
pub mod junit;
pub mod markdown;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::RunConfiguration;
use crate::error::{Error, Result};
use crate::result::RunResult;

/// HTML summary, relative to the working directory.
pub const HTML_REPORT: &str = "coverage/test-report.html";
/// Markdown summary.
pub const MARKDOWN_REPORT: &str = "TEST_SUMMARY.md";
/// JUnit XML report.
pub const JUNIT_REPORT: &str = "coverage/junit.xml";
/// Serialized run result.
pub const RESULTS_JSON: &str = "coverage/test-results.json";
/// Written only when preflight aborts the run.
pub const FAILURE_REPORT: &str = "coverage/failure-report.json";

/// Absolute locations of every artifact for one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub html: PathBuf,
    pub markdown: PathBuf,
    pub junit: PathBuf,
    pub results_json: PathBuf,
    pub failure_report: PathBuf,
}

impl ReportPaths {
    pub fn under(root: &Path) -> Self {
        Self {
            html: root.join(HTML_REPORT),
            markdown: root.join(MARKDOWN_REPORT),
            junit: root.join(JUNIT_REPORT),
            results_json: root.join(RESULTS_JSON),
            failure_report: root.join(FAILURE_REPORT),
        }
    }
}

/// Limits that drive the recommendations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportThresholds {
    /// Coverage floor in percent.
    pub coverage: f64,
    /// Phases slower than this are flagged.
    pub slow_phase: Duration,
}

impl Default for ReportThresholds {
    fn default() -> Self {
        Self {
            coverage: crate::config::DEFAULT_COVERAGE_THRESHOLD,
            slow_phase: crate::config::DEFAULT_SLOW_PHASE,
        }
    }
}

impl ReportThresholds {
    pub fn from_config(config: &RunConfiguration) -> Self {
        Self {
            coverage: config.coverage_threshold,
            slow_phase: config.slow_phase_threshold,
        }
    }
}

/// Renders and writes the HTML, Markdown and JUnit reports.
#[derive(Debug, Clone)]
pub struct ReportSynthesizer {
    paths: ReportPaths,
    thresholds: ReportThresholds,
}

impl ReportSynthesizer {
    pub fn new(paths: ReportPaths, thresholds: ReportThresholds) -> Self {
        Self { paths, thresholds }
    }

    pub fn paths(&self) -> &ReportPaths {
        &self.paths
    }

    /// Writes every report and returns the paths that were written.
    ///
    /// Errors are logged as [`Error::ReportGeneration`] and never returned.
    pub fn write_all(&self, result: &RunResult) -> Vec<PathBuf> {
        let artifacts: [(&str, &Path, Result<String>); 3] = [
            (
                "html",
                self.paths.html.as_path(),
                Ok(html::render(result, &self.thresholds)),
            ),
            (
                "markdown",
                self.paths.markdown.as_path(),
                Ok(markdown::render(result, &self.thresholds)),
            ),
            ("junit", self.paths.junit.as_path(), junit::render(result)),
        ];

        let mut written = Vec::new();
        for (artifact, path, rendered) in artifacts {
            let outcome = rendered.and_then(|content| write_artifact(path, &content));
            match outcome {
                Ok(()) => {
                    tracing::info!(artifact, path = %path.display(), "report written");
                    written.push(path.to_path_buf());
                }
                Err(e) => {
                    let err = Error::ReportGeneration {
                        artifact: artifact.to_string(),
                        reason: e.to_string(),
                    };
                    tracing::error!(artifact, path = %path.display(), error = %err, "report generation failed");
                }
            }
        }
        written
    }
}

fn write_artifact(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Formats milliseconds as seconds with two decimals.
pub fn format_secs(ms: u64) -> String {
    format!("{:.2}s", ms as f64 / 1000.0)
}
