//! Domain models for PatchGuard.
//!
//! - `InputBundle`: the (issue, code) pair under evaluation
//! - `Finding`: one piece of evidence from any layer
//! - per-layer results (`DetectionResult`, `SanitizationResult`, `ValidationResult`)
//! - `PipelineReport`: the full evidence trail of a run

pub mod bundle;
pub mod finding;
pub mod report;
pub mod verdict;

pub use bundle::InputBundle;
pub use finding::{Field, Finding, FindingSource, Location, Severity};
pub use report::{Layer, PipelineReport, PipelineState, REPORT_SCHEMA_VERSION};
pub use verdict::{
    AnalyzerDiagnostic, DetectionResult, DetectionVerdict, DiagnosticKind, PatchCandidate,
    RemovedSpan, SanitizationResult, TestResult, ValidationResult, ValidationVerdict,
};

/// Clamp a score to `[0, 1]` and round to four decimals.
///
/// Weighted sums of binary fractions drift (0.3 + 0.15 != 0.45), so every
/// score is rounded before it is compared against a threshold.
pub fn round_score(raw: f64) -> f64 {
    if !raw.is_finite() {
        return if raw > 0.0 { 1.0 } else { 0.0 };
    }
    (raw.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_score_absorbs_float_drift() {
        assert_eq!(round_score(0.3 + 0.15), 0.45);
        assert_eq!(round_score(0.1 + 0.1 + 0.1), 0.3);
        assert_eq!(round_score(1.7), 1.0);
        assert_eq!(round_score(-0.2), 0.0);
        assert_eq!(round_score(f64::NAN), 0.0);
    }
}
