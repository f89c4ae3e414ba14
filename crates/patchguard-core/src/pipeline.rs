//! Detector → Sanitizer → patch generation → Validator state machine.
//!
//! ```text
//! START ──detect──▶ DETECTED ──(BENIGN)──────────────────────▶ patch
//!   │                  │
//!   │                  └─(SUSPICIOUS | MALICIOUS*)─▶ SANITIZED ─▶ patch
//!   │                                                   │
//!   └─(MALICIOUS)─▶ REJECTED @1   (no-op + CRITICAL/spliced)└─▶ REJECTED @2
//!
//! patch ──(error/timeout)─▶ REJECTED @3
//!   └──▶ PATCHED ─validate─▶ VALIDATED ─(PASS)─▶ ACCEPTED
//!                                      └(FAIL)─▶ REJECTED @3
//! ```
//!
//! `*` only when `sanitize_on_malicious` is set. A MALICIOUS input is never
//! accepted, even when sanitized and validated.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::detector::Detector;
use crate::domain::{
    DetectionResult, DetectionVerdict, Finding, FindingSource, InputBundle, Layer,
    PatchCandidate, PipelineReport, PipelineState, SanitizationResult, Severity,
    ValidationResult, REPORT_SCHEMA_VERSION,
};
use crate::error::Result;
use crate::metrics::METRICS;
use crate::obs::{self, RunSpan};
use crate::patcher::{PatchGenerator, PatcherError};
use crate::sanitizer::{SanitizeMode, Sanitizer};
use crate::validation::{AnalyzerSet, TestSpec, Validator};

/// The assembled three-layer defense.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    detector: Arc<Detector>,
    sanitizer: Sanitizer,
    validator: Validator,
    patcher: Arc<dyn PatchGenerator>,
}

/// Evidence accumulated while a run moves through the machine.
struct RunTrail {
    run_id: Uuid,
    started: Instant,
    input: InputBundle,
    state: PipelineState,
    detection: DetectionResult,
    sanitization: Option<SanitizationResult>,
    patch: Option<PatchCandidate>,
    validation: Option<ValidationResult>,
    findings: Vec<Finding>,
}

impl RunTrail {
    fn advance(&mut self, layer: Layer, state: PipelineState, score: f64) {
        self.state = state;
        obs::emit_layer_completed(&self.run_id.to_string(), layer, state, score);
    }

    fn finish(self, accepted: bool, layer: Layer) -> PipelineReport {
        let final_state = if accepted {
            PipelineState::Accepted
        } else {
            PipelineState::Rejected
        };
        debug!(from = ?self.state, to = ?final_state, "terminal transition");

        if accepted {
            METRICS.inc_accepted();
        } else {
            METRICS.inc_rejected(layer);
        }
        obs::emit_run_finished(
            &self.run_id.to_string(),
            final_state,
            layer,
            self.started.elapsed().as_millis() as u64,
        );

        PipelineReport {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run_id: self.run_id,
            generated_at: Utc::now(),
            input_digest: self.input.digest(),
            input: self.input,
            detection: self.detection,
            sanitization: self.sanitization,
            patch: self.patch,
            validation: self.validation,
            findings: self.findings,
            final_state,
            patch_accepted: accepted,
            terminated_at_layer: layer,
        }
    }
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        analyzers: AnalyzerSet,
        patcher: Arc<dyn PatchGenerator>,
    ) -> Result<Self> {
        let detector = Arc::new(Detector::new(config.clone())?);
        Ok(Self {
            sanitizer: Sanitizer::new(detector.clone()),
            validator: Validator::new(config.clone(), analyzers)?,
            detector,
            config,
            patcher,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Run one bundle to a terminal state. Never fails: every outcome,
    /// including collaborator errors, is a report.
    pub async fn run(&self, bundle: &InputBundle, tests: Option<&TestSpec>) -> PipelineReport {
        let run_id = Uuid::new_v4();
        RunSpan::instrument(&run_id.to_string(), self.run_inner(run_id, bundle, tests)).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        bundle: &InputBundle,
        tests: Option<&TestSpec>,
    ) -> PipelineReport {
        METRICS.inc_runs();
        let run_label = run_id.to_string();
        obs::emit_run_started(&run_label, &bundle.digest());

        // Layer 1
        let started = Instant::now();
        let detection = self.detector.detect(bundle);
        let mut trail = RunTrail {
            run_id,
            started,
            input: bundle.clone(),
            state: PipelineState::Start,
            findings: detection.findings.clone(),
            detection,
            sanitization: None,
            patch: None,
            validation: None,
        };
        let verdict = trail.detection.verdict;
        trail.advance(Layer::Detection, PipelineState::Detected, trail.detection.score);

        if verdict == DetectionVerdict::Malicious && !self.config.sanitize_on_malicious {
            info!(score = trail.detection.score, "malicious input rejected");
            return trail.finish(false, Layer::Detection);
        }

        // Layer 2
        let work = if verdict == DetectionVerdict::Benign {
            bundle.clone()
        } else {
            let result = self.sanitizer.sanitize_with_mode(
                bundle,
                &trail.detection,
                SanitizeMode::for_verdict(verdict),
            );
            let work = result.sanitized_bundle.clone();
            let spliced = !result.introduced_findings.is_empty();
            let blocked = !result.changed && (result.residual_critical || spliced);
            let post_score = result.post_detection_score;
            trail.findings.extend(result.introduced_findings.iter().cloned());
            trail.sanitization = Some(result);
            trail.advance(Layer::Sanitization, PipelineState::Sanitized, post_score);

            if blocked {
                info!(spliced, "sanitization could not clear the flagged input");
                return trail.finish(false, Layer::Sanitization);
            }
            work
        };

        // Patch generation
        let timeout = self.config.patcher_timeout();
        let generated = tokio::time::timeout(
            timeout,
            self.patcher
                .generate_patch(&work.issue_text, &work.code_text),
        )
        .await
        .unwrap_or_else(|_| {
            Err(PatcherError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        });

        let candidate = match generated {
            Ok(candidate) => candidate,
            Err(err) => {
                obs::emit_patcher_failed(&run_label, self.patcher.name(), &err);
                trail.findings.push(
                    Finding::new(
                        FindingSource::Patcher,
                        err.category(),
                        Severity::High,
                        err.to_string(),
                    )
                    .with_raw(serde_json::json!({ "backend": self.patcher.name() })),
                );
                return trail.finish(false, Layer::Validation);
            }
        };
        trail.state = PipelineState::Patched;

        // Layer 3
        let validation = self.validator.validate(&candidate, tests).await;
        METRICS.add_analyzer_failures(validation.analyzer_diagnostics.len() as u64);
        trail.findings.extend(validation.findings.iter().cloned());
        let passed = validation.passed();
        let risk = validation.risk_score;
        trail.patch = Some(candidate);
        trail.validation = Some(validation);
        trail.advance(Layer::Validation, PipelineState::Validated, risk);

        if passed && verdict == DetectionVerdict::Malicious {
            info!("patch validated but input was malicious, not accepting");
        }
        let accepted = passed && verdict != DetectionVerdict::Malicious;
        trail.finish(accepted, Layer::Validation)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("patcher", &self.patcher.name())
            .field("analyzers", &self.validator.analyzers().names())
            .finish()
    }
}
