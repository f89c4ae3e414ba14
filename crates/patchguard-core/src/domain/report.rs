//! Per-run report: the evidence trail and final decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::bundle::InputBundle;
use super::finding::Finding;
use super::verdict::{
    DetectionResult, DetectionVerdict, PatchCandidate, SanitizationResult, ValidationResult,
};

/// Current report schema. Changes must be additive.
pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// States of the pipeline state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Start,
    Detected,
    Sanitized,
    Patched,
    Validated,
    Rejected,
    Accepted,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Rejected | PipelineState::Accepted)
    }
}

/// Defense layer at which a run stopped. Serialized as its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    Detection = 1,
    Sanitization = 2,
    Validation = 3,
}

impl Layer {
    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Layer::Detection),
            2 => Some(Layer::Sanitization),
            3 => Some(Layer::Validation),
            _ => None,
        }
    }
}

impl Serialize for Layer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.number())
    }
}

impl<'de> Deserialize<'de> for Layer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let n = u8::deserialize(deserializer)?;
        Layer::from_number(n)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid layer number: {n}")))
    }
}

/// Complete record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineReport {
    pub schema_version: String,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub input_digest: String,
    pub input: InputBundle,
    pub detection: DetectionResult,
    pub sanitization: Option<SanitizationResult>,
    pub patch: Option<PatchCandidate>,
    pub validation: Option<ValidationResult>,
    /// Every finding from every layer, in production order.
    pub findings: Vec<Finding>,
    pub final_state: PipelineState,
    pub patch_accepted: bool,
    pub terminated_at_layer: Layer,
}

impl PipelineReport {
    /// Check the cross-field invariants every report must satisfy.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.patch_accepted {
            if !self.validation.as_ref().is_some_and(ValidationResult::passed) {
                violations.push("accepted without a PASS validation".to_string());
            }
            if self.detection.verdict == DetectionVerdict::Malicious {
                violations.push("accepted a MALICIOUS input".to_string());
            }
            if self.final_state != PipelineState::Accepted {
                violations.push("accepted but final state is not ACCEPTED".to_string());
            }
        }

        if self.terminated_at_layer == Layer::Detection
            && (self.sanitization.is_some() || self.patch.is_some() || self.validation.is_some())
        {
            violations.push("terminated at layer 1 but later layers ran".to_string());
        }

        if !self.final_state.is_terminal() {
            violations.push(format!("non-terminal final state {:?}", self.final_state));
        }

        violations
    }
}
