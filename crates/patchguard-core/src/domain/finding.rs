//! Finding model shared by every layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which analysis source produced a finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingSource {
    Detector,
    StaticAnalyzer,
    SemanticScanner,
    DiffChecker,
    TestRunner,
    /// Patch generation failed; the finding explains why no patch exists.
    Patcher,
}

/// Finding severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which field of the input bundle a span refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Issue,
    Code,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Issue => "issue",
            Field::Code => "code",
        }
    }
}

/// Where a finding points.
///
/// `start`/`end` are byte offsets into the originating text; `line` is 1-indexed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

impl Location {
    pub fn line(line: u32) -> Self {
        Self {
            line: Some(line),
            ..Self::default()
        }
    }

    pub fn span(field: Field, start: usize, end: usize) -> Self {
        Self {
            field: Some(field),
            line: None,
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// The byte span, when both ends are known.
    pub fn byte_range(&self) -> Option<(usize, usize)> {
        match (self.start, self.end) {
            (Some(s), Some(e)) if s <= e => Some((s, e)),
            _ => None,
        }
    }
}

/// A single piece of evidence produced by one analysis source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub source: FindingSource,

    /// CWE id (e.g. "CWE-89") or pattern name (e.g. "instruction_override").
    pub category: String,

    pub severity: Severity,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    pub message: String,

    /// Opaque payload from the underlying tool.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

impl Finding {
    pub fn new(
        source: FindingSource,
        category: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            category: category.into(),
            severity,
            location: None,
            message: message.into(),
            raw: serde_json::Value::Null,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// The byte span this finding covers in `field`, if any.
    pub fn span_in(&self, field: Field) -> Option<(usize, usize)> {
        let loc = self.location.as_ref()?;
        if loc.field != Some(field) {
            return None;
        }
        loc.byte_range()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_finding_serializes_uppercase_enums() {
        let finding = Finding::new(
            FindingSource::DiffChecker,
            "CWE-89",
            Severity::High,
            "string-concatenated SQL",
        )
        .with_location(Location::line(3));

        let raw = serde_json::to_value(&finding).expect("serialize finding");
        assert_eq!(raw["source"], "DIFF_CHECKER");
        assert_eq!(raw["severity"], "HIGH");
        assert_eq!(raw["location"]["line"], 3);
        assert!(raw.get("raw").is_none());
    }

    #[test]
    fn test_span_in_requires_matching_field() {
        let finding = Finding::new(
            FindingSource::Detector,
            "shell_metachar",
            Severity::Medium,
            "command substitution",
        )
        .with_location(Location::span(Field::Issue, 4, 10));

        assert_eq!(finding.span_in(Field::Issue), Some((4, 10)));
        assert_eq!(finding.span_in(Field::Code), None);
    }
}
