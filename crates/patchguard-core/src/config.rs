//! Process-wide pipeline configuration.
//!
//! Loaded once (TOML or defaults), validated once, then shared read-only as
//! `Arc<PipelineConfig>` by every run. A run never starts with unvalidated
//! thresholds.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detector::signatures::is_known_category;
use crate::domain::{DetectionVerdict, Severity};
use crate::error::{ConfigError, Result};

/// Timeout used for analyzers without an explicit entry.
pub const DEFAULT_ANALYZER_TIMEOUT_MS: u64 = 30_000;

/// Score cut-offs for the detector verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionThresholds {
    /// Scores strictly below this are BENIGN.
    pub benign_max: f64,
    /// Scores at or above this are MALICIOUS.
    pub malicious_min: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            benign_max: 0.3,
            malicious_min: 0.7,
        }
    }
}

/// Per-severity weights used by the verdict aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeverityWeights {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            low: 0.1,
            medium: 0.3,
            high: 0.6,
            critical: 1.0,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }
}

/// Tunable knobs for all three layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection_thresholds: DetectionThresholds,
    pub severity_weights: SeverityWeights,

    /// Sanitize MALICIOUS input aggressively instead of rejecting it.
    pub sanitize_on_malicious: bool,

    /// Risk score at or above which Layer 3 fails.
    pub validation_risk_threshold: f64,

    /// Per-tool analyzer timeouts in milliseconds, keyed by analyzer name.
    pub analyzer_timeouts_ms: BTreeMap<String, u64>,

    pub test_timeout_ms: u64,
    pub patcher_timeout_ms: u64,

    /// Added lines beyond this count produce an `excessive-change` finding.
    pub max_added_lines: usize,

    /// Overrides for detector category weights.
    pub detection_weights: BTreeMap<String, f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut analyzer_timeouts_ms = BTreeMap::new();
        analyzer_timeouts_ms.insert("bandit".to_string(), 30_000);
        analyzer_timeouts_ms.insert("semgrep".to_string(), 60_000);

        Self {
            detection_thresholds: DetectionThresholds::default(),
            severity_weights: SeverityWeights::default(),
            sanitize_on_malicious: false,
            validation_risk_threshold: 0.5,
            analyzer_timeouts_ms,
            test_timeout_ms: 60_000,
            patcher_timeout_ms: 120_000,
            max_added_lines: 20,
            detection_weights: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse TOML and validate. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let t = &self.detection_thresholds;
        check_unit("detection_thresholds.benign_max", t.benign_max)?;
        check_unit("detection_thresholds.malicious_min", t.malicious_min)?;
        if t.benign_max > t.malicious_min {
            return Err(ConfigError::InvertedThresholds {
                benign_max: t.benign_max,
                malicious_min: t.malicious_min,
            });
        }

        check_unit("validation_risk_threshold", self.validation_risk_threshold)?;

        let w = &self.severity_weights;
        for (key, value) in [
            ("low", w.low),
            ("medium", w.medium),
            ("high", w.high),
            ("critical", w.critical),
        ] {
            check_weight(&format!("severity_weights.{key}"), value)?;
        }

        for (category, value) in &self.detection_weights {
            if !is_known_category(category) {
                return Err(ConfigError::UnknownCategory(category.clone()));
            }
            check_weight(&format!("detection_weights.{category}"), *value)?;
        }

        if self.test_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "test_timeout_ms".to_string(),
            });
        }
        if self.patcher_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "patcher_timeout_ms".to_string(),
            });
        }
        for (tool, ms) in &self.analyzer_timeouts_ms {
            if *ms == 0 {
                return Err(ConfigError::ZeroTimeout {
                    field: format!("analyzer_timeouts_ms.{tool}"),
                });
            }
        }

        Ok(())
    }

    /// Map a detection score onto a verdict. Boundaries belong to the higher tier.
    pub fn classify(&self, score: f64) -> DetectionVerdict {
        let t = &self.detection_thresholds;
        if score >= t.malicious_min {
            DetectionVerdict::Malicious
        } else if score >= t.benign_max {
            DetectionVerdict::Suspicious
        } else {
            DetectionVerdict::Benign
        }
    }

    pub fn analyzer_timeout(&self, tool: &str) -> Duration {
        let ms = self
            .analyzer_timeouts_ms
            .get(tool)
            .copied()
            .unwrap_or(DEFAULT_ANALYZER_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    pub fn patcher_timeout(&self) -> Duration {
        Duration::from_millis(self.patcher_timeout_ms)
    }
}

fn check_unit(field: &str, value: f64) -> std::result::Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
        })
    }
}

fn check_weight(key: &str, value: f64) -> std::result::Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidWeight {
            key: key.to_string(),
            value,
        })
    }
}
