//! PatchGuard Core Library
//!
//! Layered defense for LLM-generated security patches:
//! detection of injected instructions, sanitization of the input, and
//! validation of the produced patch, driven by [`Pipeline`].

pub mod config;
pub mod detector;
pub mod domain;
pub mod error;
pub mod evaluation;
pub mod fakes;
pub mod metrics;
pub mod obs;
pub mod patcher;
pub mod pipeline;
pub mod process;
pub mod reporting;
pub mod sanitizer;
pub mod telemetry;
pub mod validation;

pub use config::{DetectionThresholds, PipelineConfig, SeverityWeights};
pub use detector::Detector;
pub use domain::{
    round_score, AnalyzerDiagnostic, DetectionResult, DetectionVerdict, DiagnosticKind, Field,
    Finding, FindingSource, InputBundle, Layer, Location, PatchCandidate, PipelineReport,
    PipelineState, RemovedSpan, SanitizationResult, Severity, TestResult, ValidationResult,
    ValidationVerdict, REPORT_SCHEMA_VERSION,
};
pub use error::{ConfigError, PatchGuardError, Result};
pub use evaluation::{
    evaluate_batch, load_dataset, BatchResult, EvaluationSample, EvaluationSummary,
    SampleOutcome, SampleStatus,
};
pub use patcher::{PatchGenerator, PatcherError};
pub use pipeline::Pipeline;
pub use reporting::{read_reports_jsonl, write_reports_jsonl, write_summary_json};
pub use sanitizer::{SanitizeMode, Sanitizer};
pub use validation::{
    aggregate, Analyzer, AnalyzerError, AnalyzerSet, DiffChecker, TestSpec, Validator,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
