//! PatchGuard patch backends
//!
//! Concrete [`PatchGenerator`] implementations that talk to a model:
//!
//! - [`OllamaPatcher`]: direct prompting over the Ollama HTTP API
//! - [`AiderPatcher`]: the Aider CLI editing a scratch file
//! - [`EchoPatcher`]: returns the input unchanged (dry runs)

pub mod aider;
pub mod echo;
pub mod error;
pub mod ollama;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use patchguard_core::PatchGenerator;
use serde::{Deserialize, Serialize};

pub use aider::{AiderPatcher, DEFAULT_AIDER_MODEL};
pub use echo::EchoPatcher;
pub use error::{BackendError, Result};
pub use ollama::{OllamaPatcher, DEFAULT_MODEL, DEFAULT_OLLAMA_URL};

/// Which backend to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Ollama,
    Aider,
    Echo,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Ollama => "ollama",
            BackendKind::Aider => "aider",
            BackendKind::Echo => "echo",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(BackendKind::Ollama),
            "aider" => Ok(BackendKind::Aider),
            "echo" => Ok(BackendKind::Echo),
            other => Err(format!("unknown backend '{other}' (expected ollama, aider or echo)")),
        }
    }
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub ollama_url: String,
    pub model: String,
    pub aider_model: String,
    pub aider_program: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            ollama_url: std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string()),
            model: std::env::var("PATCHGUARD_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            aider_model: DEFAULT_AIDER_MODEL.to_string(),
            aider_program: "aider".to_string(),
        }
    }
}

/// Build the selected backend. `timeout` bounds a single generation.
pub fn build_backend(
    kind: BackendKind,
    config: &BackendConfig,
    timeout: Duration,
) -> Result<Arc<dyn PatchGenerator>> {
    let backend: Arc<dyn PatchGenerator> = match kind {
        BackendKind::Ollama => Arc::new(OllamaPatcher::new(
            &config.ollama_url,
            &config.model,
            timeout,
        )?),
        BackendKind::Aider => Arc::new(
            AiderPatcher::new(&config.aider_model, timeout)
                .with_program(config.aider_program.clone()),
        ),
        BackendKind::Echo => Arc::new(EchoPatcher),
    };
    Ok(backend)
}
