//! Semgrep adapter (`semgrep --config <ruleset> --json --quiet <file>`).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{map_severity, write_source, Analyzer, AnalyzerError};
use crate::domain::{Finding, FindingSource, Location};
use crate::process::run_command;

const TOOL: &str = "semgrep";
pub const DEFAULT_RULESET: &str = "p/python";

#[derive(Debug, Deserialize)]
struct SemgrepResult {
    #[serde(default)]
    check_id: String,
    #[serde(default)]
    start: Option<SemgrepPosition>,
    #[serde(default)]
    extra: SemgrepExtra,
}

#[derive(Debug, Deserialize)]
struct SemgrepPosition {
    line: u32,
}

#[derive(Debug, Default, Deserialize)]
struct SemgrepExtra {
    #[serde(default)]
    message: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct SemgrepAnalyzer {
    program: String,
    ruleset: String,
}

impl SemgrepAnalyzer {
    pub fn new() -> Self {
        Self::with_ruleset(DEFAULT_RULESET)
    }

    pub fn with_ruleset(ruleset: impl Into<String>) -> Self {
        Self {
            program: TOOL.to_string(),
            ruleset: ruleset.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for SemgrepAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyzer for SemgrepAnalyzer {
    fn name(&self) -> &str {
        TOOL
    }

    fn source(&self) -> FindingSource {
        FindingSource::SemanticScanner
    }

    async fn analyze(&self, code: &str, timeout: Duration) -> Result<Vec<Finding>, AnalyzerError> {
        let (_dir, path) = write_source(TOOL, code)?;
        let argv = vec![
            self.program.clone(),
            "--config".to_string(),
            self.ruleset.clone(),
            "--json".to_string(),
            "--quiet".to_string(),
            path.to_string_lossy().to_string(),
        ];
        let output = run_command(&argv, None, timeout)
            .await
            .map_err(|e| AnalyzerError::from_process(TOOL, e))?;

        if !matches!(output.exit_code, 0 | 1) {
            return Err(AnalyzerError::Crashed {
                tool: TOOL.to_string(),
                message: format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
            });
        }
        parse_report(&output.stdout)
    }
}

/// First `CWE-<n>` id in a rule's metadata, if any.
fn cwe_from_metadata(metadata: &serde_json::Value) -> Option<String> {
    let cwe = metadata.get("cwe")?;
    let first = match cwe {
        serde_json::Value::Array(items) => items.first()?.as_str()?,
        serde_json::Value::String(s) => s.as_str(),
        _ => return None,
    };
    let id = first.split(':').next()?.trim();
    id.starts_with("CWE-").then(|| id.to_string())
}

/// Normalize Semgrep's JSON report.
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
            let result: SemgrepResult =
                serde_json::from_value(raw.clone()).map_err(|e| malformed(e.to_string()))?;
            let category =
                cwe_from_metadata(&result.extra.metadata).unwrap_or_else(|| result.check_id.clone());
            let mut finding = Finding::new(
                FindingSource::SemanticScanner,
                category,
                map_severity(&result.extra.severity),
                format!("{}: {}", result.check_id, result.extra.message.trim()),
            )
            .with_raw(raw.clone());
            if let Some(pos) = result.start {
                finding = finding.with_location(Location::line(pos.line));
            }
            Ok(finding)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    const SAMPLE: &str = r#"{
        "errors": [],
        "results": [
            {
                "check_id": "python.lang.security.audit.formatted-sql-query",
                "path": "target.py",
                "start": {"line": 3, "col": 5},
                "end": {"line": 3, "col": 60},
                "extra": {
                    "message": "Detected possible formatted SQL query.",
                    "severity": "WARNING",
                    "metadata": {"cwe": ["CWE-89: Improper Neutralization of Special Elements used in an SQL Command"]}
                }
            },
            {
                "check_id": "python.lang.security.audit.eval-detected",
                "start": {"line": 7, "col": 1},
                "extra": {"message": "eval", "severity": "ERROR", "metadata": {}}
            },
            {
                "check_id": "custom.rule",
                "extra": {"message": "odd", "severity": "EXPERIMENT"}
            }
        ]
    }"#;

    #[test]
    fn test_parse_report() {
        let findings = parse_report(SAMPLE).unwrap();
        assert_eq!(findings.len(), 3);

        assert_eq!(findings[0].category, "CWE-89");
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].source, FindingSource::SemanticScanner);
        assert_eq!(findings[0].location.as_ref().unwrap().line, Some(3));

        assert_eq!(findings[1].category, "python.lang.security.audit.eval-detected");
        assert_eq!(findings[1].severity, Severity::High);

        assert_eq!(findings[2].severity, Severity::Medium);
        assert!(findings[2].location.is_none());
    }

    #[test]
    fn test_results_must_be_array() {
        let err = parse_report(r#"{"results": {}}"#).unwrap_err();
        assert!(matches!(err, AnalyzerError::MalformedOutput { .. }));
    }
}
