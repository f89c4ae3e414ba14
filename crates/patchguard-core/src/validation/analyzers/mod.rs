//! Static-analysis adapter set.
//!
//! Each adapter wraps one analysis engine behind [`Analyzer`] and normalizes
//! its output into [`Finding`]s. [`AnalyzerSet`] runs them concurrently and
//! isolates failures: a broken adapter contributes a diagnostic, never an
//! error for the whole run.

pub mod bandit;
pub mod pattern;
pub mod semgrep;
pub mod syntax;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tempfile::TempDir;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::domain::{AnalyzerDiagnostic, DiagnosticKind, Finding, FindingSource, Severity};
use crate::obs;
use crate::process::ProcessError;

pub use bandit::BanditAnalyzer;
pub use pattern::PatternAnalyzer;
pub use semgrep::SemgrepAnalyzer;
pub use syntax::SyntaxAnalyzer;

/// Why an analyzer could not produce findings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalyzerError {
    #[error("{tool} unavailable: {message}")]
    Unavailable { tool: String, message: String },

    #[error("{tool} timed out after {timeout_ms} ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("{tool} crashed: {message}")]
    Crashed { tool: String, message: String },

    #[error("{tool} produced malformed output: {message}")]
    MalformedOutput { tool: String, message: String },
}

impl AnalyzerError {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            AnalyzerError::Unavailable { .. } => DiagnosticKind::Unavailable,
            AnalyzerError::Timeout { .. } => DiagnosticKind::Timeout,
            AnalyzerError::Crashed { .. } => DiagnosticKind::Crashed,
            AnalyzerError::MalformedOutput { .. } => DiagnosticKind::MalformedOutput,
        }
    }

    pub fn tool(&self) -> &str {
        match self {
            AnalyzerError::Unavailable { tool, .. }
            | AnalyzerError::Timeout { tool, .. }
            | AnalyzerError::Crashed { tool, .. }
            | AnalyzerError::MalformedOutput { tool, .. } => tool,
        }
    }

    /// Map a subprocess failure onto the analyzer taxonomy.
    pub fn from_process(tool: &str, err: ProcessError) -> Self {
        let tool = tool.to_string();
        match err {
            ProcessError::NotFound { .. } => AnalyzerError::Unavailable {
                tool,
                message: err.to_string(),
            },
            ProcessError::Timeout { timeout_ms, .. } => AnalyzerError::Timeout { tool, timeout_ms },
            other => AnalyzerError::Crashed {
                tool,
                message: other.to_string(),
            },
        }
    }

    pub fn to_diagnostic(&self) -> AnalyzerDiagnostic {
        AnalyzerDiagnostic {
            tool: self.tool().to_string(),
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// One static-analysis engine.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Tool name, also the key into `analyzer_timeouts_ms`.
    fn name(&self) -> &str;

    /// Source tag stamped on every finding this adapter emits.
    fn source(&self) -> FindingSource;

    async fn analyze(&self, code: &str, timeout: Duration) -> Result<Vec<Finding>, AnalyzerError>;
}

/// Run CPU-bound analysis on the blocking pool so a per-tool timeout can
/// fire while it runs. A panicking task becomes `Crashed`.
pub(crate) async fn run_blocking<F>(tool: &str, analysis: F) -> Result<Vec<Finding>, AnalyzerError>
where
    F: FnOnce() -> Result<Vec<Finding>, AnalyzerError> + Send + 'static,
{
    tokio::task::spawn_blocking(analysis)
        .await
        .unwrap_or_else(|e| {
            Err(AnalyzerError::Crashed {
                tool: tool.to_string(),
                message: format!("analysis task failed: {e}"),
            })
        })
}

/// Merged output of every adapter in a set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisOutcome {
    pub findings: Vec<Finding>,
    pub diagnostics: Vec<AnalyzerDiagnostic>,
}

/// Ordered collection of analyzers run side by side.
#[derive(Clone)]
pub struct AnalyzerSet {
    analyzers: Vec<Arc<dyn Analyzer>>,
    config: Arc<PipelineConfig>,
}

impl AnalyzerSet {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self {
            analyzers: Vec::new(),
            config,
        }
    }

    /// In-process pattern and syntax checks plus the Bandit and Semgrep adapters.
    pub fn with_defaults(config: Arc<PipelineConfig>) -> Result<Self, regex::Error> {
        Ok(Self::new(config)
            .with(PatternAnalyzer::new()?)
            .with(SyntaxAnalyzer::new())
            .with(BanditAnalyzer::new())
            .with(SemgrepAnalyzer::new()))
    }

    pub fn with(mut self, analyzer: impl Analyzer + 'static) -> Self {
        self.analyzers.push(Arc::new(analyzer));
        self
    }

    pub fn push(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.push(analyzer);
    }

    pub fn names(&self) -> Vec<&str> {
        self.analyzers.iter().map(|a| a.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Run every analyzer concurrently; findings are concatenated in
    /// registration order.
    pub async fn analyze(&self, code: &str) -> AnalysisOutcome {
        let runs = self.analyzers.iter().map(|analyzer| {
            let timeout = self.config.analyzer_timeout(analyzer.name());
            async move {
                let result = tokio::time::timeout(timeout, analyzer.analyze(code, timeout))
                    .await
                    .unwrap_or_else(|_| {
                        Err(AnalyzerError::Timeout {
                            tool: analyzer.name().to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        })
                    });
                (analyzer.name(), result)
            }
        });

        let mut outcome = AnalysisOutcome::default();
        for (name, result) in join_all(runs).await {
            match result {
                Ok(findings) => {
                    debug!(analyzer = name, findings = findings.len(), "analyzer finished");
                    outcome.findings.extend(findings);
                }
                Err(err) => {
                    obs::emit_analyzer_failed(name, err.kind(), &err.to_string());
                    outcome.diagnostics.push(err.to_diagnostic());
                }
            }
        }
        outcome
    }
}

impl std::fmt::Debug for AnalyzerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerSet")
            .field("analyzers", &self.names())
            .finish()
    }
}

/// Map a tool severity label onto [`Severity`]. Unknown labels are MEDIUM.
pub fn map_severity(label: &str) -> Severity {
    match label.trim().to_ascii_uppercase().as_str() {
        "INFO" | "LOW" => Severity::Low,
        "WARNING" | "MEDIUM" => Severity::Medium,
        "ERROR" | "HIGH" => Severity::High,
        "CRITICAL" => Severity::Critical,
        _ => Severity::Medium,
    }
}

/// Write `code` to a fresh temp dir so a subprocess tool can read it.
///
/// The directory lives as long as the returned guard.
pub(crate) fn write_source(tool: &str, code: &str) -> Result<(TempDir, PathBuf), AnalyzerError> {
    let crashed = |e: std::io::Error| AnalyzerError::Crashed {
        tool: tool.to_string(),
        message: format!("failed to stage source: {e}"),
    };
    let dir = tempfile::Builder::new()
        .prefix("patchguard-")
        .tempdir()
        .map_err(crashed)?;
    let path = dir.path().join("target.py");
    std::fs::write(&path, code).map_err(crashed)?;
    Ok((dir, path))
}
