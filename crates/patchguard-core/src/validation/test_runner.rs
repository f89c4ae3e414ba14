//! Run a caller-supplied test suite against the patched code.

use std::io;
use std::path::{Component, Path};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::TestResult;
use crate::process::{run_command, ProcessError};

/// File the patched code is written to; tests import it as `patched`.
pub const PATCHED_FILE: &str = "patched.py";

fn default_test_file() -> String {
    "test_patched.py".to_string()
}

fn default_command() -> Vec<String> {
    vec!["pytest".to_string(), "-q".to_string()]
}

/// A test suite plus the command that runs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestSpec {
    pub test_code: String,
    #[serde(default = "default_test_file")]
    pub test_file: String,
    /// Run with the temp dir as working directory.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
}

impl TestSpec {
    pub fn pytest(test_code: impl Into<String>) -> Self {
        Self {
            test_code: test_code.into(),
            test_file: default_test_file(),
            command: default_command(),
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }
}

/// Execute `spec` against `patched_code`, bounded by `timeout`.
///
/// Without a spec the result is `evaluated = false`. The scratch directory is
/// removed on every exit path, including cancellation.
pub async fn run_tests(
    patched_code: &str,
    spec: Option<&TestSpec>,
    timeout: Duration,
) -> TestResult {
    let Some(spec) = spec else {
        return TestResult::not_evaluated();
    };
    let start = Instant::now();

    let dir = match stage(patched_code, spec) {
        Ok(dir) => dir,
        Err(e) => return failed(vec![format!("failed to stage test files: {e}")], false, start),
    };

    match run_command(&spec.command, Some(dir.path()), timeout).await {
        Ok(output) if output.success => {
            debug!(duration_ms = output.duration_ms, "tests passed");
            TestResult {
                evaluated: true,
                passed: true,
                failures: Vec::new(),
                timed_out: false,
                duration_ms: elapsed_ms(start),
            }
        }
        Ok(output) => {
            let mut failures = parse_failures(&output.stdout);
            if failures.is_empty() {
                failures.push(format!("test command exited with code {}", output.exit_code));
            }
            debug!(failures = failures.len(), "tests failed");
            failed(failures, false, start)
        }
        Err(ProcessError::Timeout { timeout_ms, .. }) => {
            warn!(timeout_ms, "test execution timed out");
            failed(vec!["timeout".to_string()], true, start)
        }
        Err(e) => {
            warn!(error = %e, "test runner could not be executed");
            failed(vec![e.to_string()], false, start)
        }
    }
}

fn stage(patched_code: &str, spec: &TestSpec) -> io::Result<tempfile::TempDir> {
    let test_file = scratch_file_name(&spec.test_file)?;
    let dir = tempfile::Builder::new().prefix("patchguard-tests-").tempdir()?;
    std::fs::write(dir.path().join(PATCHED_FILE), patched_code)?;
    std::fs::write(dir.path().join(test_file), &spec.test_code)?;
    Ok(dir)
}

/// `name` as a single plain file name inside the scratch dir.
fn scratch_file_name(name: &str) -> io::Result<&Path> {
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if name != PATCHED_FILE => Ok(path),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("test file must be a plain file name other than {PATCHED_FILE}, got {name:?}"),
        )),
    }
}

fn failed(failures: Vec<String>, timed_out: bool, start: Instant) -> TestResult {
    TestResult {
        evaluated: true,
        passed: false,
        failures,
        timed_out,
        duration_ms: elapsed_ms(start),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// pytest's `FAILED ...` / `ERROR ...` summary lines.
pub fn parse_failures(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("FAILED ") || line.starts_with("ERROR "))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_parse_failures() {
        let out = "..F\n=== short test summary info ===\nFAILED test_patched.py::test_add - assert 3 == 4\nERROR test_patched.py - ImportError\n1 failed, 2 passed\n";
        assert_eq!(
            parse_failures(out),
            vec![
                "FAILED test_patched.py::test_add - assert 3 == 4",
                "ERROR test_patched.py - ImportError"
            ]
        );
    }

    #[test]
    fn test_scratch_file_name_rejects_paths() {
        assert!(scratch_file_name("test_patched.py").is_ok());
        for bad in ["", "../escape.py", "/tmp/escape.py", "sub/test.py", ".", "..", PATCHED_FILE] {
            let err = scratch_file_name(bad).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_test_file_cannot_escape_scratch_dir() {
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("escaped_test.py");
        let spec = TestSpec {
            test_code: "print('hi')\n".to_string(),
            test_file: target.to_string_lossy().to_string(),
            command: sh("exit 0"),
        };

        let result = run_tests("x = 1\n", Some(&spec), Duration::from_secs(10)).await;

        assert!(result.evaluated);
        assert!(!result.passed);
        assert!(result.failures[0].starts_with("failed to stage test files"));
        assert!(!target.exists());

        let relative = TestSpec {
            test_file: "../escaped_test.py".to_string(),
            ..spec
        };
        let result = run_tests("x = 1\n", Some(&relative), Duration::from_secs(10)).await;
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn test_no_spec_is_not_evaluated() {
        let result = run_tests("x = 1", None, Duration::from_secs(1)).await;
        assert!(!result.evaluated);
        assert!(!result.failed());
    }

    #[tokio::test]
    async fn test_files_are_staged_in_working_dir() {
        let spec = TestSpec::pytest("def test_x():\n    pass\n")
            .with_command(sh("test -f patched.py && grep -q 'x = 1' patched.py && test -f test_patched.py"));
        let result = run_tests("x = 1\n", Some(&spec), Duration::from_secs(10)).await;
        assert!(result.evaluated);
        assert!(result.passed, "{:?}", result.failures);
    }

    #[tokio::test]
    async fn test_failure_lines_are_collected() {
        let spec = TestSpec::pytest("").with_command(sh(
            "echo 'FAILED test_patched.py::test_login - AssertionError'; exit 1",
        ));
        let result = run_tests("", Some(&spec), Duration::from_secs(10)).await;
        assert!(result.failed());
        assert_eq!(
            result.failures,
            vec!["FAILED test_patched.py::test_login - AssertionError"]
        );
    }

    #[tokio::test]
    async fn test_exit_code_fallback_message() {
        let spec = TestSpec::pytest("").with_command(sh("exit 3"));
        let result = run_tests("", Some(&spec), Duration::from_secs(10)).await;
        assert!(result.failed());
        assert_eq!(result.failures, vec!["test command exited with code 3"]);
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let spec = TestSpec::pytest("").with_command(sh("sleep 5"));
        let result = run_tests("", Some(&spec), Duration::from_millis(100)).await;
        assert!(result.evaluated);
        assert!(!result.passed);
        assert!(result.timed_out);
        assert_eq!(result.failures, vec!["timeout"]);
    }

    #[tokio::test]
    async fn test_missing_runner_is_a_failure() {
        let spec = TestSpec::pytest("").with_command(vec!["patchguard-no-such-runner".to_string()]);
        let result = run_tests("", Some(&spec), Duration::from_secs(1)).await;
        assert!(result.evaluated);
        assert!(!result.passed);
        assert!(result.failures[0].contains("not found"));
    }
}
