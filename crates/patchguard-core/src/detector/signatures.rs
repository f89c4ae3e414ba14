//! Detection categories and lexical adversarial signatures.
//!
//! The category table is the documented default weight table: scores are a
//! sum of these weights, so changing a number here changes every score.
//!
//! | Category                | Severity | Weight | Scope        | Removable | Scoring   |
//! |-------------------------|----------|--------|--------------|-----------|-----------|
//! | `instruction_override`  | CRITICAL | 0.45   | issue + code | yes       | per match |
//! | `malicious_request`     | HIGH     | 0.35   | issue + code | yes       | per match |
//! | `role_switch`           | HIGH     | 0.30   | issue + code | yes       | per match |
//! | `dangerous_call`        | HIGH     | 0.30   | issue        | yes       | per match |
//! | `destructive_command`   | HIGH     | 0.30   | issue        | yes       | per match |
//! | `shell_metachar`        | MEDIUM   | 0.15   | issue        | yes       | per match |
//! | `markup_injection`      | MEDIUM   | 0.20   | issue        | yes       | per match |
//! | `credential_disclosure` | LOW      | 0.05   | issue        | redacted  | per match |
//! | `hidden_unicode`        | MEDIUM   | 0.20   | issue + code | yes       | once      |
//! | `role_marker`           | HIGH     | 0.30   | issue + code | yes       | per match |
//! | `imperative_to_model`   | MEDIUM   | 0.20   | issue        | no        | once      |
//! | `embedded_code_fence`   | MEDIUM   | 0.15   | issue        | no        | once      |

use regex::Regex;

use crate::domain::{Field, Severity};

/// Which bundle fields a category is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    IssueOnly,
    Both,
}

impl Scope {
    pub fn covers(&self, field: Field) -> bool {
        match self {
            Scope::IssueOnly => field == Field::Issue,
            Scope::Both => true,
        }
    }
}

/// How repeated hits of one category add to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scoring {
    PerMatch,
    Once,
}

/// How the sanitizer treats a category's spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Span is excised.
    Excise,
    /// Span is replaced with a fixed marker.
    Redact(&'static str),
    /// Only removed in aggressive mode (whole line).
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryDef {
    pub name: &'static str,
    pub severity: Severity,
    pub weight: f64,
    pub scope: Scope,
    pub removal: Removal,
    pub scoring: Scoring,
    pub description: &'static str,
}

impl CategoryDef {
    pub fn removable(&self) -> bool {
        !matches!(self.removal, Removal::Keep)
    }
}

pub const REDACTION_MARKER: &str = "[REDACTED]";

pub const CATEGORIES: &[CategoryDef] = &[
    CategoryDef {
        name: "instruction_override",
        severity: Severity::Critical,
        weight: 0.45,
        scope: Scope::Both,
        removal: Removal::Excise,
        scoring: Scoring::PerMatch,
        description: "instruction-override phrase",
    },
    CategoryDef {
        name: "malicious_request",
        severity: Severity::High,
        weight: 0.35,
        scope: Scope::Both,
        removal: Removal::Excise,
        scoring: Scoring::PerMatch,
        description: "request for malicious functionality",
    },
    CategoryDef {
        name: "role_switch",
        severity: Severity::High,
        weight: 0.30,
        scope: Scope::Both,
        removal: Removal::Excise,
        scoring: Scoring::PerMatch,
        description: "role-switching phrase",
    },
    CategoryDef {
        name: "dangerous_call",
        severity: Severity::High,
        weight: 0.30,
        scope: Scope::IssueOnly,
        removal: Removal::Excise,
        scoring: Scoring::PerMatch,
        description: "dangerous call embedded in the bug report",
    },
    CategoryDef {
        name: "destructive_command",
        severity: Severity::High,
        weight: 0.30,
        scope: Scope::IssueOnly,
        removal: Removal::Excise,
        scoring: Scoring::PerMatch,
        description: "destructive shell command",
    },
    CategoryDef {
        name: "shell_metachar",
        severity: Severity::Medium,
        weight: 0.15,
        scope: Scope::IssueOnly,
        removal: Removal::Excise,
        scoring: Scoring::PerMatch,
        description: "shell metacharacter sequence",
    },
    CategoryDef {
        name: "markup_injection",
        severity: Severity::Medium,
        weight: 0.20,
        scope: Scope::IssueOnly,
        removal: Removal::Excise,
        scoring: Scoring::PerMatch,
        description: "markup or script injection marker",
    },
    CategoryDef {
        name: "credential_disclosure",
        severity: Severity::Low,
        weight: 0.05,
        scope: Scope::IssueOnly,
        removal: Removal::Redact(REDACTION_MARKER),
        scoring: Scoring::PerMatch,
        description: "credential value in the bug report",
    },
    CategoryDef {
        name: "hidden_unicode",
        severity: Severity::Medium,
        weight: 0.20,
        scope: Scope::Both,
        removal: Removal::Excise,
        scoring: Scoring::Once,
        description: "zero-width or bidi control characters",
    },
    CategoryDef {
        name: "role_marker",
        severity: Severity::High,
        weight: 0.30,
        scope: Scope::Both,
        removal: Removal::Excise,
        scoring: Scoring::PerMatch,
        description: "chat role marker",
    },
    CategoryDef {
        name: "imperative_to_model",
        severity: Severity::Medium,
        weight: 0.20,
        scope: Scope::IssueOnly,
        removal: Removal::Keep,
        scoring: Scoring::Once,
        description: "instruction addressed to the model",
    },
    CategoryDef {
        name: "embedded_code_fence",
        severity: Severity::Medium,
        weight: 0.15,
        scope: Scope::IssueOnly,
        removal: Removal::Keep,
        scoring: Scoring::Once,
        description: "code fence inside the bug report",
    },
];

pub fn category(name: &str) -> Option<&'static CategoryDef> {
    CATEGORIES.iter().find(|c| c.name == name)
}

pub fn is_known_category(name: &str) -> bool {
    category(name).is_some()
}

/// Lexical patterns as `(category, regex)`.
///
/// `credential_disclosure` patterns capture the secret value in group 1; the
/// span of group 1 is what gets redacted.
const LEXICAL_PATTERNS: &[(&str, &str)] = &[
    (
        "instruction_override",
        r"(?i)\b(?:ignore|disregard|forget|override)\s+(?:all\s+|any\s+|the\s+|your\s+)*(?:previous|prior|above|earlier|preceding|original)\s+(?:instructions?|prompts?|rules|directions|guidelines)",
    ),
    (
        "instruction_override",
        r"(?i)\bforget\s+(?:everything|what\s+i\s+(?:said|told\s+you))",
    ),
    (
        "malicious_request",
        r"(?i)\b(?:add|insert|include|plant|hide|install)\s+(?:a\s+|an\s+|the\s+)?(?:hidden\s+|secret\s+|small\s+|subtle\s+)?(?:backdoor|malware|trojan|keylogger|reverse\s+shell)",
    ),
    ("malicious_request", r"(?i)\brun\s+(?:the\s+)?malware\b"),
    ("malicious_request", r"(?i)\binsert\s+malicious\s+code\b"),
    (
        "malicious_request",
        r"(?i)\b(?:disable|remove|skip)\s+(?:the\s+)?(?:authentication|authorization|auth\s+checks?|security\s+checks?)",
    ),
    ("malicious_request", r"(?i)\boverride\s+security\b"),
    (
        "malicious_request",
        r"(?i)\bbypass\s+(?:the\s+)?(?:validation|authentication|security)\b",
    ),
    ("malicious_request", r"(?i)\bdrop\s+(?:the\s+)?database\b"),
    ("malicious_request", r"(?i)\bdelete\s+all\s+(?:files|data)\b"),
    ("malicious_request", r"(?i)\bexfiltrat\w*"),
    ("role_switch", r"(?i)\byou\s+are\s+now\b"),
    ("role_switch", r"(?i)\b(?:system\s+prompt|new\s+instructions?)\s*:"),
    (
        "role_switch",
        r"(?i)\b(?:developer|dan|god)\s+mode\s+(?:enabled|activated|on)\b",
    ),
    ("role_switch", r"(?i)\bdo\s+anything\s+now\b"),
    ("role_switch", r"<\|(?:im_start|im_end|system|endoftext)\|>"),
    (
        "role_switch",
        r"(?i)\bact\s+as\s+(?:an?\s+)?(?:unrestricted|unfiltered|jailbroken|evil)\b",
    ),
    ("dangerous_call", r"(?i)\bos\.system\s*\("),
    ("dangerous_call", r"(?i)\bexec\s*\("),
    ("dangerous_call", r"(?i)\beval\s*\("),
    ("dangerous_call", r"(?i)\bsubprocess\.Popen\b"),
    ("dangerous_call", r"__import__\s*\("),
    ("destructive_command", r"(?i)\brm\s+-(?:rf|fr)\b"),
    ("destructive_command", r"(?i)\bchmod\s+(?:-R\s+)?777\b"),
    ("destructive_command", r"(?i)\bmkfs(?:\.\w+)?\b"),
    ("destructive_command", r"(?i)\bdd\s+if="),
    ("shell_metachar", r"\$\([^)\n]*\)"),
    (
        "shell_metachar",
        r"(?:;|&&|\|\|)\s*(?:curl|wget|nc|bash|sh|rm|chmod|python3?)\b",
    ),
    ("shell_metachar", r"\|\s*(?:ba)?sh\b"),
    ("markup_injection", r"(?i)<\s*script\b"),
    ("markup_injection", r"(?i)\bjavascript\s*:"),
    ("markup_injection", r"(?i)<\s*iframe\b"),
    ("markup_injection", r"(?i)\bon(?:error|load)\s*="),
    (
        "credential_disclosure",
        r#"(?i)\b(?:password|passwd|api[_-]?key|secret|token)\s*[:=]\s*([^\s"',;]+)"#,
    ),
];

/// A compiled lexical signature.
#[derive(Debug, Clone)]
pub struct Signature {
    pub category: &'static CategoryDef,
    pub regex: Regex,
}

impl Signature {
    /// Byte spans of every match in `text`.
    ///
    /// Uses capture group 1 when the pattern defines one.
    pub fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        if self.regex.captures_len() > 1 {
            self.regex
                .captures_iter(text)
                .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|m| (m.start(), m.end()))
                .collect()
        } else {
            self.regex
                .find_iter(text)
                .map(|m| (m.start(), m.end()))
                .collect()
        }
    }
}

/// Compile the lexical signature table.
pub fn compile_signatures() -> Result<Vec<Signature>, regex::Error> {
    LEXICAL_PATTERNS
        .iter()
        .filter_map(|(name, pattern)| category(name).map(|cat| (cat, pattern)))
        .map(|(cat, pattern)| {
            Ok(Signature {
                category: cat,
                regex: Regex::new(pattern)?,
            })
        })
        .collect()
}
