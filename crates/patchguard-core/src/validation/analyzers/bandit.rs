//! Bandit adapter (`bandit -f json -q <file>`).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{map_severity, write_source, Analyzer, AnalyzerError};
use crate::domain::{Finding, FindingSource, Location};
use crate::process::run_command;

const TOOL: &str = "bandit";

#[derive(Debug, Deserialize)]
struct BanditIssue {
    #[serde(default)]
    test_id: String,
    #[serde(default)]
    test_name: String,
    #[serde(default)]
    issue_severity: String,
    #[serde(default)]
    issue_text: String,
    #[serde(default)]
    line_number: Option<u32>,
    #[serde(default)]
    issue_cwe: Option<BanditCwe>,
}

#[derive(Debug, Deserialize)]
struct BanditCwe {
    id: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct BanditAnalyzer {
    program: String,
}

impl BanditAnalyzer {
    pub fn new() -> Self {
        Self::with_program(TOOL)
    }

    /// Use a specific executable (e.g. a venv path).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for BanditAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyzer for BanditAnalyzer {
    fn name(&self) -> &str {
        TOOL
    }

    fn source(&self) -> FindingSource {
        FindingSource::StaticAnalyzer
    }

    async fn analyze(&self, code: &str, timeout: Duration) -> Result<Vec<Finding>, AnalyzerError> {
        let (_dir, path) = write_source(TOOL, code)?;
        let argv = vec![
            self.program.clone(),
            "-f".to_string(),
            "json".to_string(),
            "-q".to_string(),
            path.to_string_lossy().to_string(),
        ];
        let output = run_command(&argv, None, timeout)
            .await
            .map_err(|e| AnalyzerError::from_process(TOOL, e))?;

        // Exit 1 means "issues found"; anything else non-zero is a tool failure.
        if !matches!(output.exit_code, 0 | 1) {
            return Err(AnalyzerError::Crashed {
                tool: TOOL.to_string(),
                message: format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
            });
        }
        parse_report(&output.stdout)
    }
}

/// Normalize Bandit's JSON report.
pub fn parse_report(stdout: &str) -> Result<Vec<Finding>, AnalyzerError> {
    let malformed = |message: String| AnalyzerError::MalformedOutput {
        tool: TOOL.to_string(),
        message,
    };
    let report: serde_json::Value =
        serde_json::from_str(stdout).map_err(|e| malformed(e.to_string()))?;
    let results = match report.get("results") {
        None => return Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items,
        Some(_) => return Err(malformed("`results` is not an array".to_string())),
    };

    results
        .iter()
        .map(|raw| {
            let issue: BanditIssue =
                serde_json::from_value(raw.clone()).map_err(|e| malformed(e.to_string()))?;
            let category = match issue.issue_cwe.and_then(|c| c.id) {
                Some(id) if id > 0 => format!("CWE-{id}"),
                _ => issue.test_id.clone(),
            };
            let message = if issue.test_name.is_empty() {
                issue.issue_text.clone()
            } else {
                format!("{} ({}): {}", issue.test_name, issue.test_id, issue.issue_text)
            };
            let mut finding = Finding::new(
                FindingSource::StaticAnalyzer,
                category,
                map_severity(&issue.issue_severity),
                message,
            )
            .with_raw(raw.clone());
            if let Some(line) = issue.line_number {
                finding = finding.with_location(Location::line(line));
            }
            Ok(finding)
        })
        .collect()
}
