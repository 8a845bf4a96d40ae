//! Standalone HTML summary.

use quick_xml::escape::escape;

use crate::phase::PhaseStatus;
use crate::result::RunResult;

use super::{format_secs, ReportThresholds};

const STYLE: &str = "body{font-family:sans-serif;margin:2em;color:#222}\
table{border-collapse:collapse;margin-bottom:2em}\
th,td{border:1px solid #ccc;padding:.4em .8em;text-align:left}\
.success{color:#1a7f37}.failed{color:#cf222e}.low{color:#bf8700}\
pre{white-space:pre-wrap;background:#f6f8fa;padding:.6em}";

/// Renders `coverage/test-report.html`.
pub fn render(result: &RunResult, thresholds: &ReportThresholds) -> String {
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<title>Test Report</title>\n");
    html.push_str(&format!("<style>{}</style>\n", STYLE));
    html.push_str("</head>\n<body>\n");

    let (class, label) = if result.is_success() {
        ("success", "PASSED")
    } else {
        ("failed", "FAILED")
    };
    html.push_str(&format!(
        "<h1>Test Report <span class=\"{}\">{}</span></h1>\n",
        class, label
    ));
    html.push_str(&format!(
        "<p>Run <code>{}</code> started {} &middot; total {}</p>\n",
        result.run_id,
        result.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
        format_secs(result.total_duration_ms())
    ));
    if result.cancelled {
        html.push_str("<p class=\"failed\">Run was interrupted; results are partial.</p>\n");
    }

    html.push_str("<h2>Phases</h2>\n");
    html.push_str("<table>\n<tr><th>Phase</th><th>Description</th><th>Status</th><th>Duration</th></tr>\n");
    for phase in &result.phases {
        let class = match phase.status {
            PhaseStatus::Success => "success",
            PhaseStatus::Failed => "failed",
            _ => "",
        };
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td></tr>\n",
            escape(phase.name.as_str()),
            escape(phase.description.as_str()),
            class,
            phase.status,
            format_secs(phase.duration_ms)
        ));
        if let Some(message) = &phase.error_message {
            html.push_str(&format!(
                "<tr><td colspan=\"4\"><pre>{}</pre></td></tr>\n",
                escape(message.as_str())
            ));
        }
    }
    html.push_str("</table>\n");

    html.push_str("<h2>Coverage</h2>\n");
    match &result.coverage {
        Some(summary) => {
            html.push_str("<table>\n<tr><th>Dimension</th><th>Covered</th><th>Total</th><th>Percent</th></tr>\n");
            for (dimension, metric) in &summary.dimensions {
                let class = if metric.pct < thresholds.coverage {
                    " class=\"low\""
                } else {
                    ""
                };
                html.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td{}>{:.2}%</td></tr>\n",
                    dimension, metric.covered, metric.total, class, metric.pct
                ));
            }
            html.push_str("</table>\n");
        }
        None => html.push_str("<p>Coverage was not measured.</p>\n"),
    }

    html.push_str("</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures;

    #[test]
    fn escapes_error_messages() {
        let html = render(&fixtures::mixed_run(), &ReportThresholds::default());

        assert!(html.contains("<span class=\"failed\">FAILED</span>"));
        assert!(html.contains("expected &lt;b&gt; &amp;"));
        assert!(!html.contains("expected <b>"));
    }

    #[test]
    fn flags_low_coverage() {
        let html = render(&fixtures::mixed_run(), &ReportThresholds::default());
        assert!(html.contains("<td class=\"low\">70.00%</td>"));
        assert!(html.contains("<td>85.00%</td>"));
    }

    #[test]
    fn missing_coverage_is_stated() {
        let html = render(&fixtures::clean_run(), &ReportThresholds::default());
        assert!(html.contains("Coverage was not measured."));
        assert!(html.contains("<span class=\"success\">PASSED</span>"));
    }
}
