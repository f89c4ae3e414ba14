//! Error taxonomy for PatchGuard.
//!
//! Only configuration errors are allowed to abort a process. Everything that
//! can go wrong during a run (analyzer crashes, patcher timeouts, test
//! timeouts) is captured as data inside the run report instead.

/// Invalid configuration values, detected once at startup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: String, value: f64 },

    #[error("benign_max ({benign_max}) must not exceed malicious_min ({malicious_min})")]
    InvertedThresholds { benign_max: f64, malicious_min: f64 },

    #[error("weight for {key} must be finite and non-negative, got {value}")]
    InvalidWeight { key: String, value: f64 },

    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: String },

    #[error("unknown detection category: {0}")]
    UnknownCategory(String),
}

/// PatchGuard errors.
#[derive(Debug, thiserror::Error)]
pub enum PatchGuardError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for PatchGuard operations.
pub type Result<T> = std::result::Result<T, PatchGuardError>;
