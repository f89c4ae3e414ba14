//! Combine Layer 3 signals into one PASS/FAIL decision.

use serde_json::json;

use crate::config::PipelineConfig;
use crate::domain::{
    round_score, Finding, FindingSource, Severity, TestResult, ValidationResult, ValidationVerdict,
};

/// Aggregate analyzer findings, diff findings and the test outcome.
///
/// Rules, in order:
/// 1. any CRITICAL finding fails;
/// 2. the summed severity weight (capped at 1.0) fails at or above
///    `validation_risk_threshold`;
/// 3. an evaluated, failing test suite fails.
///
/// Every input finding is retained. A failing suite appends one
/// `TEST_RUNNER` finding after the static and diff findings.
pub fn aggregate(
    static_findings: &[Finding],
    diff_findings: &[Finding],
    test_result: Option<&TestResult>,
    config: &PipelineConfig,
) -> ValidationResult {
    let mut findings: Vec<Finding> = static_findings
        .iter()
        .chain(diff_findings.iter())
        .cloned()
        .collect();

    let risk_score = round_score(
        findings
            .iter()
            .map(|f| config.severity_weights.weight(f.severity))
            .sum::<f64>(),
    );

    let mut reasons = Vec::new();

    let critical: Vec<&Finding> = findings.iter().filter(|f| f.is_critical()).collect();
    for f in &critical {
        reasons.push(format!("critical finding {} from {:?}", f.category, f.source));
    }

    if risk_score >= config.validation_risk_threshold {
        reasons.push(format!(
            "risk score {risk_score} at or above threshold {}",
            config.validation_risk_threshold
        ));
    }

    if let Some(result) = test_result.filter(|r| r.failed()) {
        let summary = if result.timed_out {
            "test suite timed out".to_string()
        } else {
            format!("{} test failure(s)", result.failures.len().max(1))
        };
        reasons.push(summary.clone());
        findings.push(
            Finding::new(
                FindingSource::TestRunner,
                if result.timed_out {
                    "test-timeout"
                } else {
                    "test-failure"
                },
                Severity::High,
                summary,
            )
            .with_raw(json!({ "failures": result.failures })),
        );
    }

    let verdict = if reasons.is_empty() {
        ValidationVerdict::Pass
    } else {
        ValidationVerdict::Fail
    };

    ValidationResult {
        verdict,
        findings,
        test_result: test_result.cloned(),
        risk_score,
        reasons,
        analyzer_diagnostics: Vec::new(),
    }
}
