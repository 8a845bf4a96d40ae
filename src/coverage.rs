//! Coverage aggregation across independently produced summaries.
//!
//! Each test framework writes an Istanbul-style `coverage-summary.json`.
//! Summaries are merged by adding raw counters per dimension; percentages
//! are computed once from the merged counters.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One axis of coverage measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageDimension {
    Lines,
    Functions,
    Branches,
    Statements,
}

impl CoverageDimension {
    pub const ALL: [CoverageDimension; 4] = [
        CoverageDimension::Lines,
        CoverageDimension::Functions,
        CoverageDimension::Branches,
        CoverageDimension::Statements,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageDimension::Lines => "lines",
            CoverageDimension::Functions => "functions",
            CoverageDimension::Branches => "branches",
            CoverageDimension::Statements => "statements",
        }
    }
}

impl fmt::Display for CoverageDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merged counters and percentage for one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetric {
    pub covered: u64,
    pub total: u64,
    /// Percentage in `[0, 100]`.
    pub pct: f64,
}

impl CoverageMetric {
    /// Builds a metric from raw counters.
    ///
    /// A dimension with nothing to cover reports 100%.
    pub fn from_counts(covered: u64, total: u64) -> Self {
        let pct = if total == 0 {
            100.0
        } else {
            covered.min(total) as f64 * 100.0 / total as f64
        };
        Self {
            covered,
            total,
            pct,
        }
    }
}

/// Coverage for one run, keyed by dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub dimensions: BTreeMap<CoverageDimension, CoverageMetric>,
}

impl CoverageSummary {
    /// Percentage for one dimension, if measured.
    pub fn pct(&self, dimension: CoverageDimension) -> Option<f64> {
        self.dimensions.get(&dimension).map(|m| m.pct)
    }

    /// Dimension → percentage mapping.
    pub fn percentages(&self) -> BTreeMap<CoverageDimension, f64> {
        self.dimensions.iter().map(|(d, m)| (*d, m.pct)).collect()
    }

    /// Dimensions below `threshold` percent, in dimension order.
    pub fn below(&self, threshold: f64) -> Vec<(CoverageDimension, f64)> {
        self.dimensions
            .iter()
            .filter(|(_, m)| m.pct < threshold)
            .map(|(d, m)| (*d, m.pct))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct IstanbulSummary {
    total: IstanbulTotals,
}

#[derive(Debug, Default, Deserialize)]
struct IstanbulTotals {
    lines: Option<IstanbulCounter>,
    functions: Option<IstanbulCounter>,
    branches: Option<IstanbulCounter>,
    statements: Option<IstanbulCounter>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct IstanbulCounter {
    total: u64,
    covered: u64,
}

impl IstanbulTotals {
    fn counter(&self, dimension: CoverageDimension) -> Option<IstanbulCounter> {
        match dimension {
            CoverageDimension::Lines => self.lines,
            CoverageDimension::Functions => self.functions,
            CoverageDimension::Branches => self.branches,
            CoverageDimension::Statements => self.statements,
        }
    }
}

/// Raw per-dimension counters read from one artifact.
type Counters = BTreeMap<CoverageDimension, (u64, u64)>;

/// Merges coverage artifacts into one summary.
#[derive(Debug, Clone)]
pub struct CoverageAggregator {
    artifacts: Vec<PathBuf>,
}

impl CoverageAggregator {
    /// Creates an aggregator over the given artifact paths (duplicates ignored).
    pub fn new(artifacts: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut unique: Vec<PathBuf> = Vec::new();
        for path in artifacts {
            if !unique.contains(&path) {
                unique.push(path);
            }
        }
        Self { artifacts: unique }
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    /// Reads and merges every usable artifact.
    ///
    /// Missing or malformed artifacts are skipped with a warning. Returns
    /// `None` when no artifact was usable.
    pub fn aggregate(&self) -> Option<CoverageSummary> {
        let mut merged: Counters = BTreeMap::new();
        let mut used = 0usize;

        for path in &self.artifacts {
            match read_counters(path) {
                Ok(counters) => {
                    used += 1;
                    for (dimension, (covered, total)) in counters {
                        let entry = merged.entry(dimension).or_insert((0, 0));
                        entry.0 += covered;
                        entry.1 += total;
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping coverage artifact");
                }
            }
        }

        if used == 0 {
            tracing::warn!(
                artifacts = self.artifacts.len(),
                "no usable coverage artifacts"
            );
            return None;
        }

        let dimensions = merged
            .into_iter()
            .map(|(d, (covered, total))| (d, CoverageMetric::from_counts(covered, total)))
            .collect();

        tracing::info!(artifacts = used, "merged coverage artifacts");
        Some(CoverageSummary { dimensions })
    }
}

fn read_counters(path: &Path) -> Result<Counters> {
    let content = std::fs::read_to_string(path)?;
    parse_counters(&content)
}

fn parse_counters(content: &str) -> Result<Counters> {
    let summary: IstanbulSummary = serde_json::from_str(content)?;

    let mut counters = BTreeMap::new();
    for dimension in CoverageDimension::ALL {
        if let Some(counter) = summary.total.counter(dimension) {
            if counter.covered > counter.total {
                return Err(Error::InvalidArtifact(format!(
                    "{} covered ({}) exceeds total ({})",
                    dimension, counter.covered, counter.total
                )));
            }
            counters.insert(dimension, (counter.covered, counter.total));
        }
    }

    if counters.is_empty() {
        return Err(Error::InvalidArtifact(
            "summary has no coverage dimensions".to_string(),
        ));
    }
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn summary_json(lines: (u64, u64), branches: (u64, u64)) -> String {
        format!(
            r#"{{
                "total": {{
                    "lines": {{ "total": {}, "covered": {}, "skipped": 0, "pct": 0 }},
                    "branches": {{ "total": {}, "covered": {}, "skipped": 0, "pct": 0 }}
                }},
                "/src/app.ts": {{ "lines": {{ "total": 1, "covered": 1 }} }}
            }}"#,
            lines.1, lines.0, branches.1, branches.0
        )
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn merges_raw_counters_not_percentages() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "unit.json", &summary_json((80, 100), (1, 2)));
        let b = write(&dir, "integration.json", &summary_json((30, 100), (9, 18)));

        let summary = CoverageAggregator::new([a, b]).aggregate().unwrap();

        let lines = summary.dimensions[&CoverageDimension::Lines];
        assert_eq!((lines.covered, lines.total), (110, 200));
        assert_eq!(lines.pct, 55.0);
        assert_eq!(summary.pct(CoverageDimension::Branches), Some(50.0));
        assert_eq!(summary.pct(CoverageDimension::Functions), None);
    }

    #[test]
    fn weights_by_size_of_each_artifact() {
        let dir = TempDir::new().unwrap();
        let small = write(&dir, "small.json", &summary_json((1, 1), (1, 1)));
        let large = write(&dir, "large.json", &summary_json((0, 99), (0, 1)));

        let summary = CoverageAggregator::new([small, large]).aggregate().unwrap();
        assert_eq!(summary.pct(CoverageDimension::Lines), Some(1.0));
    }

    #[test]
    fn skips_missing_and_malformed_artifacts() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "good.json", &summary_json((50, 100), (5, 10)));
        let broken = write(&dir, "broken.json", "{ not json");
        let inverted = write(&dir, "inverted.json", &summary_json((120, 100), (1, 1)));
        let missing = dir.path().join("missing.json");

        let summary = CoverageAggregator::new([broken, good, inverted, missing])
            .aggregate()
            .unwrap();
        assert_eq!(summary.pct(CoverageDimension::Lines), Some(50.0));
    }

    #[test]
    fn no_usable_artifact_means_not_measured() {
        let dir = TempDir::new().unwrap();
        let empty = write(&dir, "empty.json", r#"{ "total": {} }"#);

        assert!(CoverageAggregator::new([empty]).aggregate().is_none());
        assert!(CoverageAggregator::new(Vec::new()).aggregate().is_none());
    }

    #[test]
    fn zero_measured_coverage_is_present_and_zero() {
        let dir = TempDir::new().unwrap();
        let none_hit = write(&dir, "cold.json", &summary_json((0, 40), (0, 4)));

        let summary = CoverageAggregator::new([none_hit]).aggregate().unwrap();
        assert_eq!(summary.pct(CoverageDimension::Lines), Some(0.0));
    }

    #[test]
    fn duplicate_paths_are_counted_once() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.json", &summary_json((10, 20), (1, 2)));

        let aggregator = CoverageAggregator::new([a.clone(), a]);
        assert_eq!(aggregator.artifacts().len(), 1);
        let summary = aggregator.aggregate().unwrap();
        assert_eq!(summary.dimensions[&CoverageDimension::Lines].total, 20);
    }

    #[test]
    fn percentages_stay_within_bounds() {
        for (covered, total) in [(0, 0), (0, 7), (7, 7), (3, 9)] {
            let metric = CoverageMetric::from_counts(covered, total);
            assert!((0.0..=100.0).contains(&metric.pct));
        }
        assert_eq!(CoverageMetric::from_counts(0, 0).pct, 100.0);
    }

    #[test]
    fn whole_percentages_are_exact() {
        assert_eq!(CoverageMetric::from_counts(110, 200).pct, 55.0);
        assert_eq!(CoverageMetric::from_counts(57, 100).pct, 57.0);
        assert_eq!(CoverageMetric::from_counts(7, 7).pct, 100.0);
        assert_eq!(CoverageMetric::from_counts(1, 8).pct, 12.5);
    }

    #[test]
    fn below_lists_dimensions_under_threshold() {
        let mut summary = CoverageSummary::default();
        summary
            .dimensions
            .insert(CoverageDimension::Lines, CoverageMetric::from_counts(90, 100));
        summary
            .dimensions
            .insert(CoverageDimension::Branches, CoverageMetric::from_counts(70, 100));

        assert_eq!(summary.below(80.0), vec![(CoverageDimension::Branches, 70.0)]);
    }
}
