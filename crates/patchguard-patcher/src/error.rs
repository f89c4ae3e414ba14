//! Error types for patch backends

use patchguard_core::process::ProcessError;
use patchguard_core::PatcherError;
use thiserror::Error;

/// Errors that can occur while talking to a patch backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// HTTP transport failure (connection refused, DNS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected JSON
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Subprocess backend could not be run
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Subprocess backend exited with an error
    #[error("{program} exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BackendError> for PatcherError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Process(ProcessError::Timeout { timeout_ms, .. }) => {
                PatcherError::Timeout { timeout_ms }
            }
            BackendError::Json(e) => PatcherError::MalformedOutput(e.to_string()),
            other => PatcherError::ModelUnavailable(other.to_string()),
        }
    }
}

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_timeout_maps_to_timeout() {
        let err = BackendError::Process(ProcessError::Timeout {
            program: "aider".to_string(),
            timeout_ms: 1500,
        });
        assert_eq!(
            PatcherError::from(err),
            PatcherError::Timeout { timeout_ms: 1500 }
        );
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let err = BackendError::Process(ProcessError::NotFound {
            program: "aider".to_string(),
        });
        assert_eq!(
            PatcherError::from(err),
            PatcherError::ModelUnavailable("aider not found on PATH".to_string())
        );
    }

    #[test]
    fn test_bad_json_is_malformed() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(
            PatcherError::from(BackendError::Json(json_err)),
            PatcherError::MalformedOutput(_)
        ));
    }

    #[test]
    fn test_status_is_unavailable() {
        let err = BackendError::Status {
            status: 404,
            body: "model 'x' not found".to_string(),
        };
        match PatcherError::from(err) {
            PatcherError::ModelUnavailable(msg) => assert!(msg.contains("404")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
