//! Test execution results.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Project language, selects the runtime image and test runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the command actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sandboxed,
    /// Sandbox runtime absent; ran directly on the host.
    Direct,
}

/// One failing test, as recovered from the runner's report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    /// Workspace-relative file the failure is attributed to.
    pub file: String,
    pub test_name: String,
    /// 0 when unknown.
    pub line: u32,
    pub message: String,
}

/// Parsed, runner-independent test report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub total: u32,
    pub passed: u32,
    pub failures: Vec<TestFailure>,
}

/// Interpretation of a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum TestVerdict {
    Passed,
    Failed { failures: Vec<TestFailure> },
    /// Zero failures because nothing ran. Distinct from `Passed`.
    NoTestsDiscoverable { reason: String, runner_missing: bool },
    TimedOut { after_secs: u64 },
}

/// Result of running a test command. Carries no retry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub language: Language,
    pub stdout: String,
    pub stderr: String,
    /// -1 when the process timed out or was killed by a signal.
    pub exit_code: i32,
    pub succeeded: bool,
    pub structured_report: Option<TestReport>,
    pub mode: ExecutionMode,
    pub verdict: TestVerdict,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn timed_out(&self) -> bool {
        matches!(self.verdict, TestVerdict::TimedOut { .. })
    }

    pub fn failures(&self) -> &[TestFailure] {
        match &self.verdict {
            TestVerdict::Failed { failures } => failures,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_only_for_failed_verdict() {
        let result = ExecutionResult {
            language: Language::Python,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            succeeded: false,
            structured_report: None,
            mode: ExecutionMode::Sandboxed,
            verdict: TestVerdict::TimedOut { after_secs: 1 },
            duration_ms: 1000,
        };
        assert!(result.timed_out());
        assert!(result.failures().is_empty());
    }

    #[test]
    fn test_verdict_serializes_tagged() {
        let v = TestVerdict::NoTestsDiscoverable {
            reason: "pytest exit 5".to_string(),
            runner_missing: false,
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["verdict"], "no_tests_discoverable");
    }
}
