//! Per-layer result types.

use serde::{Deserialize, Serialize};

use super::bundle::InputBundle;
use super::finding::{Field, Finding, Severity};

/// Layer 1 classification of the raw input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionVerdict {
    Benign,
    Suspicious,
    Malicious,
}

/// Output of the detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionResult {
    pub verdict: DetectionVerdict,

    /// Clamped weighted sum of finding weights, in `[0, 1]`.
    pub score: f64,

    pub findings: Vec<Finding>,

    /// Distinct categories that fired, in first-seen order.
    pub matched_patterns: Vec<String>,

    /// Set when the input was empty or unparseable and scored by default.
    #[serde(default)]
    pub low_confidence: bool,
}

impl DetectionResult {
    /// Default result for input that could not be analysed.
    pub fn low_confidence_benign() -> Self {
        Self {
            verdict: DetectionVerdict::Benign,
            score: 0.0,
            findings: Vec::new(),
            matched_patterns: Vec::new(),
            low_confidence: true,
        }
    }

    pub fn has_critical(&self) -> bool {
        self.findings.iter().any(Finding::is_critical)
    }
}

/// A span the sanitizer excised from one field of the original bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovedSpan {
    pub field: Field,
    /// Byte offsets into the original field text.
    pub start: usize,
    pub end: usize,
    /// Comma-separated categories that caused the removal.
    pub reason: String,
    /// Text written in place of the span (empty for plain excision).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replacement: String,
}

/// Output of the sanitizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SanitizationResult {
    pub sanitized_bundle: InputBundle,
    pub removed_spans: Vec<RemovedSpan>,
    pub applied_defensive_headers: Vec<String>,
    pub changed: bool,

    /// Detection score of the bundle that was handed on.
    pub post_detection_score: f64,

    /// A CRITICAL finding survived sanitization.
    #[serde(default)]
    pub residual_critical: bool,

    /// Findings the excisions created, which a second pass would still
    /// edit. Only set when the sanitizer fell back to the original input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub introduced_findings: Vec<Finding>,
}

/// Patch produced by the external patcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchCandidate {
    pub original_code: String,
    pub patched_code: String,
    pub patch_diff: String,
    /// Name of the backend that produced the patch.
    #[serde(default)]
    pub backend: String,
}

/// Layer 3 decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationVerdict {
    Pass,
    Fail,
}

/// Outcome of running a test suite against patched code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResult {
    /// False when no suite was supplied; `passed` is then meaningless.
    pub evaluated: bool,
    pub passed: bool,
    pub failures: Vec<String>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TestResult {
    pub fn not_evaluated() -> Self {
        Self {
            evaluated: false,
            passed: true,
            failures: Vec::new(),
            timed_out: false,
            duration_ms: 0,
        }
    }

    /// Tests ran and did not pass.
    pub fn failed(&self) -> bool {
        self.evaluated && !self.passed
    }
}

/// Why an analyzer produced no findings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Unavailable,
    Timeout,
    Crashed,
    MalformedOutput,
}

/// Marker left by an analyzer that failed in isolation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyzerDiagnostic {
    pub tool: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Output of Layer 3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub verdict: ValidationVerdict,
    pub findings: Vec<Finding>,
    pub test_result: Option<TestResult>,
    pub risk_score: f64,
    /// Human-readable reasons for a FAIL (empty on PASS).
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub analyzer_diagnostics: Vec<AnalyzerDiagnostic>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.verdict == ValidationVerdict::Pass
    }

    /// Highest severity among the retained findings.
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_evaluated_is_not_a_failure() {
        let result = TestResult::not_evaluated();
        assert!(!result.evaluated);
        assert!(result.passed);
        assert!(!result.failed());
    }

    #[test]
    fn test_removed_span_omits_empty_replacement() {
        let span = RemovedSpan {
            field: Field::Issue,
            start: 0,
            end: 4,
            reason: "hidden_unicode".to_string(),
            replacement: String::new(),
        };
        let raw = serde_json::to_value(&span).expect("serialize span");
        assert!(raw.get("replacement").is_none());
        assert_eq!(raw["field"], "issue");
    }
}
