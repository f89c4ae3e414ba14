//! Persisted run artifacts: one report per line (JSONL) and a batch summary.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::domain::{PipelineReport, REPORT_SCHEMA_VERSION};
use crate::evaluation::EvaluationSummary;

/// Write reports as JSON Lines, one compact object per line.
pub fn write_reports_jsonl(path: &Path, reports: &[PipelineReport]) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("create {:?}", path))?;
    let mut out = BufWriter::new(file);
    for report in reports {
        let line = serde_json::to_string(report).context("serialize pipeline report")?;
        writeln!(out, "{line}").with_context(|| format!("write {:?}", path))?;
    }
    out.flush().with_context(|| format!("flush {:?}", path))?;
    Ok(())
}

/// Read a JSONL report file. Blank lines are skipped; reports with a
/// different major schema version are rejected.
pub fn read_reports_jsonl(path: &Path) -> Result<Vec<PipelineReport>> {
    let file = std::fs::File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut reports = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {:?}", path))?;
        if line.trim().is_empty() {
            continue;
        }
        let report: PipelineReport = serde_json::from_str(&line)
            .with_context(|| format!("parse report on line {}", idx + 1))?;
        if major(&report.schema_version) != major(REPORT_SCHEMA_VERSION) {
            bail!(
                "unsupported report schema {} on line {}",
                report.schema_version,
                idx + 1
            );
        }
        reports.push(report);
    }
    Ok(reports)
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

/// Write the batch summary in pretty JSON format.
pub fn write_summary_json(path: &Path, summary: &EvaluationSummary) -> Result<()> {
    let content = serde_json::to_string_pretty(summary).context("serialize evaluation summary")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render the summary as a short markdown table.
pub fn render_summary_md(summary: &EvaluationSummary) -> String {
    let mut out = String::new();
    out.push_str("# PatchGuard Evaluation\n\n");
    out.push_str("| metric | value |\n|---|---|\n");
    let rows = [
        ("samples", summary.total.to_string()),
        ("attacked", summary.attacked.to_string()),
        ("blocked at layer 1", summary.layer1_blocked.to_string()),
        ("sanitized at layer 2", summary.layer2_sanitized.to_string()),
        ("rejected at layer 2", summary.layer2_rejected.to_string()),
        ("rejected at layer 3", summary.layer3_rejected.to_string()),
        ("patches approved", summary.patches_approved.to_string()),
        (
            "vulnerabilities introduced",
            summary.vulnerabilities_introduced.to_string(),
        ),
        (
            "attack success rate",
            format!("{:.2}%", summary.attack_success_rate),
        ),
        (
            "false rejection rate",
            format!("{:.2}%", summary.false_rejection_rate),
        ),
    ];
    for (name, value) in rows {
        out.push_str(&format!("| {} | {} |\n", name, value));
    }
    out
}
