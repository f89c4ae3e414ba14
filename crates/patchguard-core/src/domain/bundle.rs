//! The (issue, code) pair a pipeline run starts from.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::finding::Field;

/// Raw input to a pipeline run.
///
/// Never mutated once a run starts; the sanitizer builds a new bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputBundle {
    pub issue_text: String,
    pub code_text: String,
}

impl InputBundle {
    pub fn new(issue_text: impl Into<String>, code_text: impl Into<String>) -> Self {
        Self {
            issue_text: issue_text.into(),
            code_text: code_text.into(),
        }
    }

    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::Issue => &self.issue_text,
            Field::Code => &self.code_text,
        }
    }

    /// True when both fields are empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.issue_text.trim().is_empty() && self.code_text.trim().is_empty()
    }

    /// SHA-256 hex digest over both fields.
    ///
    /// Each field is length-prefixed so ("ab", "c") and ("a", "bc") differ.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for text in [&self.issue_text, &self.code_text] {
            hasher.update((text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}
