use anyhow::{Context, Result};
use std::path::Path;

use crate::report::{BatchReport, Outcome};

/// Render the console report: one line per target, then parse errors, then
/// a summary line.
pub fn render_report_text(report: &BatchReport) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        match outcome {
            Outcome::Success {
                site,
                page_id,
                revision_id,
                already_applied,
                ..
            } => {
                out.push_str(&format!("Rollbacked {site}: {page_id} (rev {revision_id})"));
                if *already_applied {
                    out.push_str(" [already applied]");
                }
                out.push('\n');
            }
            Outcome::Failure {
                site,
                page_id,
                reason,
                message,
                ..
            } => {
                out.push_str(&format!(
                    "Did not rollback {site}: {page_id} [{reason}] {message}\n"
                ));
            }
        }
    }

    if !report.parse_errors.is_empty() {
        out.push_str(&format!(
            "\n{} line(s) could not be parsed:\n",
            report.parse_errors.len()
        ));
        for err in &report.parse_errors {
            out.push_str(&format!("  {err}\n"));
        }
    }

    let counts = &report.counts;
    out.push_str(&format!(
        "\n{} succeeded, {} failed, {} skipped",
        counts.succeeded, counts.failed, counts.skipped
    ));
    if !report.parse_errors.is_empty() {
        out.push_str(&format!(", {} unparsed", report.parse_errors.len()));
    }
    if report.cancelled {
        out.push_str(" (cancelled)");
    }
    out.push('\n');
    out
}

/// Write the report as pretty JSON.
pub fn write_report_json(path: &Path, report: &BatchReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize batch report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
