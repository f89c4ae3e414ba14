//! Dry-run backend that returns the code unchanged.

use async_trait::async_trait;
use patchguard_core::patcher::candidate;
use patchguard_core::{PatchCandidate, PatchGenerator, PatcherError};

/// Exercises the pipeline end to end without a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoPatcher;

#[async_trait]
impl PatchGenerator for EchoPatcher {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate_patch(
        &self,
        _issue_text: &str,
        code_text: &str,
    ) -> Result<PatchCandidate, PatcherError> {
        Ok(candidate(self.name(), code_text, code_text.to_string()))
    }
}
