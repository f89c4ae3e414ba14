//! Layer 3: validation of a generated patch.
//!
//! - `analyzers`: static-analysis adapters run side by side
//! - `diff_checker`: weaknesses introduced on added lines
//! - `test_runner`: functional check against a supplied suite
//! - `aggregator`: one PASS/FAIL verdict from all of the above

pub mod aggregator;
pub mod analyzers;
pub mod diff_checker;
pub mod test_runner;

use std::sync::Arc;

use tracing::debug;

use crate::config::PipelineConfig;
use crate::domain::{PatchCandidate, ValidationResult};

pub use aggregator::aggregate;
pub use analyzers::{AnalysisOutcome, Analyzer, AnalyzerError, AnalyzerSet};
pub use diff_checker::{unified_diff, DiffChecker};
pub use test_runner::{run_tests, TestSpec};

/// Runs every Layer 3 signal against one patch candidate.
#[derive(Debug, Clone)]
pub struct Validator {
    config: Arc<PipelineConfig>,
    analyzers: AnalyzerSet,
    diff_checker: Arc<DiffChecker>,
}

impl Validator {
    pub fn new(config: Arc<PipelineConfig>, analyzers: AnalyzerSet) -> Result<Self, regex::Error> {
        let diff_checker = Arc::new(DiffChecker::new(config.max_added_lines)?);
        Ok(Self {
            config,
            analyzers,
            diff_checker,
        })
    }

    pub fn analyzers(&self) -> &AnalyzerSet {
        &self.analyzers
    }

    /// Analyzers and tests run concurrently; the diff check is in-process.
    pub async fn validate(
        &self,
        candidate: &PatchCandidate,
        tests: Option<&TestSpec>,
    ) -> ValidationResult {
        let (analysis, test_result) = tokio::join!(
            self.analyzers.analyze(&candidate.patched_code),
            run_tests(&candidate.patched_code, tests, self.config.test_timeout()),
        );
        let diff_findings = self
            .diff_checker
            .check_diff(&candidate.original_code, &candidate.patched_code);

        let mut result = aggregate(
            &analysis.findings,
            &diff_findings,
            Some(&test_result),
            &self.config,
        );
        result.analyzer_diagnostics = analysis.diagnostics;

        debug!(
            verdict = ?result.verdict,
            risk_score = result.risk_score,
            findings = result.findings.len(),
            diagnostics = result.analyzer_diagnostics.len(),
            "validation complete"
        );
        result
    }
}
