//! In-process scan for forbidden calls in the patched source.
//!
//! Always available, so Layer 3 keeps a static signal even when no external
//! analyzer is installed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use super::{run_blocking, Analyzer, AnalyzerError};
use crate::domain::{Finding, FindingSource, Location, Severity};

const TOOL: &str = "pattern";

/// `(rule id, CWE, severity, regex, message)`
const RULES: &[(&str, &str, Severity, &str, &str)] = &[
    (
        "os-system",
        "CWE-78",
        Severity::High,
        r"\bos\.system\s*\(",
        "os.system executes through the shell",
    ),
    (
        "subprocess-popen",
        "CWE-78",
        Severity::Medium,
        r"\bsubprocess\.Popen\s*\(",
        "subprocess.Popen spawns an arbitrary process",
    ),
    (
        "eval",
        "CWE-95",
        Severity::High,
        r"\beval\s*\(",
        "eval evaluates dynamic code",
    ),
    (
        "exec",
        "CWE-95",
        Severity::High,
        r"\bexec\s*\(",
        "exec runs dynamic code",
    ),
    (
        "dunder-import",
        "CWE-95",
        Severity::Medium,
        r"\b__import__\s*\(",
        "__import__ loads modules by name at runtime",
    ),
    (
        "rm-rf",
        "CWE-78",
        Severity::High,
        r"\brm\s+-(?:rf|fr)\b",
        "recursive forced delete",
    ),
];

struct Rule {
    id: &'static str,
    cwe: &'static str,
    severity: Severity,
    regex: Regex,
    message: &'static str,
}

pub struct PatternAnalyzer {
    rules: Arc<[Rule]>,
}

impl PatternAnalyzer {
    pub fn new() -> Result<Self, regex::Error> {
        let rules = RULES
            .iter()
            .map(|&(id, cwe, severity, pattern, message)| {
                Ok(Rule {
                    id,
                    cwe,
                    severity,
                    regex: Regex::new(pattern)?,
                    message,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            rules: rules.into(),
        })
    }

    /// Synchronous scan; comment lines are skipped.
    pub fn scan(&self, code: &str) -> Vec<Finding> {
        scan_rules(&self.rules, code)
    }
}

fn scan_rules(rules: &[Rule], code: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (idx, line) in code.lines().enumerate() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        for rule in rules {
            if rule.regex.is_match(line) {
                findings.push(
                    Finding::new(
                        FindingSource::StaticAnalyzer,
                        rule.cwe,
                        rule.severity,
                        format!("{}: {}", rule.id, rule.message),
                    )
                    .with_location(Location::line(idx as u32 + 1))
                    .with_raw(json!({ "rule": rule.id, "line": line.trim() })),
                );
            }
        }
    }
    findings
}

#[async_trait]
impl Analyzer for PatternAnalyzer {
    fn name(&self) -> &str {
        TOOL
    }

    fn source(&self) -> FindingSource {
        FindingSource::StaticAnalyzer
    }

    async fn analyze(&self, code: &str, _timeout: Duration) -> Result<Vec<Finding>, AnalyzerError> {
        let rules = self.rules.clone();
        let code = code.to_string();
        run_blocking(TOOL, move || Ok(scan_rules(&rules, &code))).await
    }
}
