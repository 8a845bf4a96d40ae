//! Markdown summary with recommendations.

use crate::coverage::CoverageSummary;
use crate::phase::PhaseStatus;
use crate::result::RunResult;

use super::{format_secs, ReportThresholds};

/// Renders `TEST_SUMMARY.md`.
pub fn render(result: &RunResult, thresholds: &ReportThresholds) -> String {
    let mut body = String::new();

    body.push_str("# Test Summary\n\n");
    let status = if result.is_success() {
        "✅ PASSED"
    } else {
        "❌ FAILED"
    };
    body.push_str(&format!("**Status:** {}\n\n", status));
    body.push_str(&format!("**Run ID:** `{}`\n\n", result.run_id));
    body.push_str(&format!(
        "**Started:** {}\n\n",
        result.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    body.push_str(&format!(
        "**Total Duration:** {}\n\n",
        format_secs(result.total_duration_ms())
    ));
    if result.cancelled {
        body.push_str("> Run was interrupted; results are partial.\n\n");
    }

    let failed = result.failed_phases().count();
    body.push_str(&format!(
        "## Phases ({} run, {} passed, {} failed)\n\n",
        result.phases.len(),
        result.phases.len() - failed,
        failed
    ));
    if result.phases.is_empty() {
        body.push_str("_No phases were run._\n\n");
    } else {
        body.push_str("| Phase | Description | Status | Duration |\n");
        body.push_str("|-------|-------------|--------|----------|\n");
        for phase in &result.phases {
            let status = match phase.status {
                PhaseStatus::Success => "✅ success",
                PhaseStatus::Failed => "❌ failed",
                PhaseStatus::Running => "running",
                PhaseStatus::Pending => "pending",
            };
            body.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                table_cell(&phase.name),
                table_cell(&phase.description),
                status,
                format_secs(phase.duration_ms)
            ));
        }
        body.push('\n');
    }

    if failed > 0 {
        body.push_str("## Failures\n\n");
        for phase in result.failed_phases() {
            body.push_str(&format!("### {}\n\n", phase.name));
            let message = phase.error_message.as_deref().unwrap_or("no error message");
            let fence = fence_for(message);
            body.push_str(&format!("{}\n{}\n{}\n\n", fence, message, fence));
        }
    }

    body.push_str("## Coverage\n\n");
    match &result.coverage {
        Some(summary) => render_coverage(&mut body, summary),
        None => body.push_str("_Coverage was not measured._\n\n"),
    }

    body.push_str("## Recommendations\n\n");
    let recommendations = recommendations(result, thresholds);
    if recommendations.is_empty() {
        body.push_str("No recommendations. All phases passed within thresholds.\n");
    } else {
        for recommendation in recommendations {
            body.push_str(&format!("- {}\n", recommendation));
        }
    }

    body
}

fn render_coverage(body: &mut String, summary: &CoverageSummary) {
    body.push_str("| Dimension | Covered | Total | Percent |\n");
    body.push_str("|-----------|---------|-------|---------|\n");
    for (dimension, metric) in &summary.dimensions {
        body.push_str(&format!(
            "| {} | {} | {} | {:.2}% |\n",
            dimension, metric.covered, metric.total, metric.pct
        ));
    }
    body.push('\n');
}

/// Escapes pipes and flattens newlines so text stays in one table cell.
fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(|c: char| c == '\r' || c == '\n', " ")
}

/// A backtick fence longer than any backtick run inside `text`.
fn fence_for(text: &str) -> String {
    let longest = text
        .split(|c: char| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

/// Advisory recommendations derived from the run.
///
/// Flags failed phases, phases slower than the slow-phase threshold, and
/// coverage dimensions under the coverage floor.
pub fn recommendations(result: &RunResult, thresholds: &ReportThresholds) -> Vec<String> {
    let mut out = Vec::new();

    let failed: Vec<&str> = result.failed_phases().map(|p| p.name.as_str()).collect();
    if !failed.is_empty() {
        out.push(format!(
            "Fix {} failed phase{}: {}",
            failed.len(),
            if failed.len() == 1 { "" } else { "s" },
            failed.join(", ")
        ));
    }

    if result.cancelled {
        out.push("Re-run without interruption to get complete results".to_string());
    }

    for phase in &result.phases {
        if phase.duration() > thresholds.slow_phase {
            out.push(format!(
                "Phase `{}` took {} (over {}s); consider splitting or parallelizing it",
                phase.name,
                format_secs(phase.duration_ms),
                thresholds.slow_phase.as_secs()
            ));
        }
    }

    if let Some(summary) = &result.coverage {
        for (dimension, pct) in summary.below(thresholds.coverage) {
            out.push(format!(
                "Raise {} coverage from {:.2}% to at least {}%",
                dimension, pct, thresholds.coverage
            ));
        }
    }

    out
}
