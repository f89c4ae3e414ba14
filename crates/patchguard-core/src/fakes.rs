//! Deterministic stand-ins for external collaborators (testing and dry runs).
//!
//! Patchers: `FixedPatcher`, `FnPatcher`, `FailingPatcher`, `SlowPatcher`.
//! Analyzers: `StaticFindingsAnalyzer`, `FailingAnalyzer`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Finding, FindingSource, PatchCandidate};
use crate::patcher::{candidate, PatchGenerator, PatcherError};
use crate::validation::{Analyzer, AnalyzerError};

// ---------------------------------------------------------------------------
// Patchers
// ---------------------------------------------------------------------------

/// Always returns the same patched code.
#[derive(Debug, Default)]
pub struct FixedPatcher {
    patched_code: String,
    calls: AtomicUsize,
}

impl FixedPatcher {
    pub fn new(patched_code: impl Into<String>) -> Self {
        Self {
            patched_code: patched_code.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PatchGenerator for FixedPatcher {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn generate_patch(
        &self,
        _issue_text: &str,
        code_text: &str,
    ) -> Result<PatchCandidate, PatcherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(candidate(self.name(), code_text, self.patched_code.clone()))
    }
}

type PatchFn = dyn Fn(&str, &str) -> String + Send + Sync;

/// Computes the patch from the (issue, code) it receives.
pub struct FnPatcher {
    f: Box<PatchFn>,
    calls: AtomicUsize,
}

impl FnPatcher {
    pub fn new(f: impl Fn(&str, &str) -> String + Send + Sync + 'static) -> Self {
        Self {
            f: Box::new(f),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replace every occurrence of `from` with `to` in the code.
    pub fn replacing(from: impl Into<String>, to: impl Into<String>) -> Self {
        let (from, to) = (from.into(), to.into());
        Self::new(move |_, code| code.replace(&from, &to))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PatchGenerator for FnPatcher {
    fn name(&self) -> &str {
        "fn"
    }

    async fn generate_patch(
        &self,
        issue_text: &str,
        code_text: &str,
    ) -> Result<PatchCandidate, PatcherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(candidate(self.name(), code_text, (self.f)(issue_text, code_text)))
    }
}

/// Always fails with the configured error.
#[derive(Debug)]
pub struct FailingPatcher {
    error: PatcherError,
}

impl FailingPatcher {
    pub fn new(error: PatcherError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl PatchGenerator for FailingPatcher {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate_patch(
        &self,
        _issue_text: &str,
        _code_text: &str,
    ) -> Result<PatchCandidate, PatcherError> {
        Err(self.error.clone())
    }
}

/// Sleeps before echoing the code back unchanged.
#[derive(Debug)]
pub struct SlowPatcher {
    delay: Duration,
}

impl SlowPatcher {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PatchGenerator for SlowPatcher {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate_patch(
        &self,
        _issue_text: &str,
        code_text: &str,
    ) -> Result<PatchCandidate, PatcherError> {
        tokio::time::sleep(self.delay).await;
        Ok(candidate(self.name(), code_text, code_text.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Analyzers
// ---------------------------------------------------------------------------

/// Reports a fixed list of findings for any input.
#[derive(Debug, Clone)]
pub struct StaticFindingsAnalyzer {
    name: String,
    source: FindingSource,
    findings: Vec<Finding>,
}

impl StaticFindingsAnalyzer {
    pub fn new(name: impl Into<String>, source: FindingSource, findings: Vec<Finding>) -> Self {
        Self {
            name: name.into(),
            source,
            findings,
        }
    }
}

#[async_trait]
impl Analyzer for StaticFindingsAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> FindingSource {
        self.source
    }

    async fn analyze(&self, _code: &str, _timeout: Duration) -> Result<Vec<Finding>, AnalyzerError> {
        Ok(self.findings.clone())
    }
}

/// Always fails with the configured error.
#[derive(Debug, Clone)]
pub struct FailingAnalyzer {
    name: String,
    error: AnalyzerError,
}

impl FailingAnalyzer {
    pub fn new(error: AnalyzerError) -> Self {
        Self {
            name: error.tool().to_string(),
            error,
        }
    }

    /// An analyzer whose executable is not installed.
    pub fn unavailable(tool: &str) -> Self {
        Self::new(AnalyzerError::Unavailable {
            tool: tool.to_string(),
            message: format!("{tool} not found on PATH"),
        })
    }
}

#[async_trait]
impl Analyzer for FailingAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> FindingSource {
        FindingSource::StaticAnalyzer
    }

    async fn analyze(&self, _code: &str, _timeout: Duration) -> Result<Vec<Finding>, AnalyzerError> {
        Err(self.error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_patcher_counts_calls_and_diffs() {
        let patcher = FixedPatcher::new("x = 2\n");
        let c = patcher.generate_patch("issue", "x = 1\n").await.unwrap();
        assert_eq!(c.original_code, "x = 1\n");
        assert_eq!(c.patched_code, "x = 2\n");
        assert!(c.patch_diff.contains("-x = 1\n+x = 2\n"));
        assert_eq!(c.backend, "fixed");
        assert_eq!(patcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_replacing_patcher() {
        let patcher = FnPatcher::replacing("+ name", "+ name.strip()");
        let c = patcher.generate_patch("", "q = 'a' + name\n").await.unwrap();
        assert_eq!(c.patched_code, "q = 'a' + name.strip()\n");
    }

    #[tokio::test]
    async fn test_failing_analyzer() {
        let analyzer = FailingAnalyzer::unavailable("bandit");
        assert_eq!(analyzer.name(), "bandit");
        let err = analyzer.analyze("", Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), crate::domain::DiagnosticKind::Unavailable);
    }
}
