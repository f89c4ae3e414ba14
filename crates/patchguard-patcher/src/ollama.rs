//! Ollama HTTP backend
//!
//! Sends one non-streaming `/api/generate` request per patch and extracts the
//! first fenced code block from the model's answer.

use std::time::Duration;

use async_trait::async_trait;
use patchguard_core::patcher::{build_prompt, candidate, extract_code};
use patchguard_core::{PatchCandidate, PatchGenerator, PatcherError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BackendError, Result};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.1:8b";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Patch generator backed by a local Ollama server
#[derive(Debug, Clone)]
pub struct OllamaPatcher {
    base_url: String,
    model: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl OllamaPatcher {
    /// Create a client for `base_url`. `timeout` bounds each HTTP request.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("patchguard/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(OllamaPatcher {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
            http_client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    /// Raw completion for `prompt`.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let url = self.generate_url();
        debug!(url = %url, model = %self.model, "requesting completion");

        let response = self
            .http_client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl PatchGenerator for OllamaPatcher {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate_patch(
        &self,
        issue_text: &str,
        code_text: &str,
    ) -> std::result::Result<PatchCandidate, PatcherError> {
        let prompt = build_prompt(issue_text, code_text);
        let output = match self.complete(&prompt).await {
            Ok(output) => output,
            Err(BackendError::Http(e)) if e.is_timeout() => {
                return Err(PatcherError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
            Err(e) => {
                warn!(error = %e, "ollama request failed");
                return Err(e.into());
            }
        };
        let patched = extract_code(&output)?;
        Ok(candidate(self.name(), code_text, patched))
    }
}
