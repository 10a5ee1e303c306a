//! Runner report parsing (pytest-json-report, jest `--json`, plain text).

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::classifier::extract_line;
use crate::domain::{Defect, Language, TestFailure, TestReport};

const MAX_MESSAGE_CHARS: usize = 4000;

/// Maps runner-reported paths back to workspace-relative paths.
#[derive(Debug, Clone)]
pub struct PathMapper {
    roots: Vec<String>,
}

impl PathMapper {
    /// `roots` are absolute prefixes under which the workspace is visible
    /// (container mount point, host path).
    pub fn new(roots: impl IntoIterator<Item = String>) -> Self {
        Self {
            roots: roots
                .into_iter()
                .map(|r| r.trim_end_matches('/').to_string())
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }

    /// Workspace-relative path, or `None` if `path` lies outside the
    /// workspace (absolute elsewhere, or climbing out with `..`) or inside
    /// installed dependencies.
    pub fn relativize(&self, path: &str) -> Option<String> {
        let path = path.replace('\\', "/");
        let relative = if path.starts_with('/') {
            self.roots
                .iter()
                .find_map(|root| path.strip_prefix(&format!("{root}/")))
                .map(str::to_string)?
        } else {
            path.trim_start_matches("./").to_string()
        };
        if !Defect::is_workspace_relative(&relative)
            || relative.contains("site-packages/")
            || relative.contains("node_modules/")
        {
            return None;
        }
        Some(relative)
    }

    /// [`PathMapper::relativize`], or [`Defect::UNKNOWN_FILE`] for paths
    /// that cannot be attributed to a workspace file.
    pub fn attribute(&self, path: &str) -> String {
        self.relativize(path)
            .unwrap_or_else(|| Defect::UNKNOWN_FILE.to_string())
    }
}

fn truncate(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.chars().count() <= MAX_MESSAGE_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed
        .chars()
        .rev()
        .take(MAX_MESSAGE_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

fn as_u32(v: Option<&Value>) -> Option<u32> {
    v.and_then(Value::as_u64).and_then(|n| u32::try_from(n).ok())
}

/// Parse a structured report for `language`.
pub fn parse_structured(language: Language, report: &Value, paths: &PathMapper) -> Option<TestReport> {
    match language {
        Language::Python => parse_pytest(report, paths),
        Language::JavaScript => parse_jest(report, paths),
    }
}

/// pytest-json-report: `tests[]` and failed `collectors[]`.
pub fn parse_pytest(report: &Value, paths: &PathMapper) -> Option<TestReport> {
    let object = report.as_object()?;
    let tests = object.get("tests").and_then(Value::as_array);
    let collectors = object.get("collectors").and_then(Value::as_array);
    if tests.is_none() && collectors.is_none() && object.get("summary").is_none() {
        return None;
    }

    let mut failures = Vec::new();
    for test in tests.into_iter().flatten() {
        let outcome = test.get("outcome").and_then(Value::as_str).unwrap_or("");
        if outcome != "failed" && outcome != "error" {
            continue;
        }
        let nodeid = test.get("nodeid").and_then(Value::as_str).unwrap_or("");
        let mut node_parts = nodeid.splitn(2, "::");
        let node_file = node_parts.next().unwrap_or("");
        let test_name = node_parts.next().unwrap_or(nodeid).to_string();

        // The failing phase: call, else setup, else teardown.
        let phase = ["call", "setup", "teardown"].iter().find_map(|p| {
            test.get(*p)
                .filter(|ph| ph.get("outcome").and_then(Value::as_str) != Some("passed"))
        });
        let crash = phase.and_then(|p| p.get("crash"));
        let longrepr = phase
            .and_then(|p| p.get("longrepr"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let crash_message = crash
            .and_then(|c| c.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let message = if crash_message.is_empty() {
            longrepr
        } else {
            crash_message
        };

        let crash_location = crash.and_then(|c| {
            let path = c.get("path").and_then(Value::as_str)?;
            Some((paths.relativize(path)?, as_u32(c.get("lineno")).unwrap_or(0)))
        });
        let (file, line) = match crash_location {
            Some((file, line)) => (file, line),
            None => (
                paths.attribute(node_file),
                extract_line(longrepr),
            ),
        };

        failures.push(TestFailure {
            file,
            test_name,
            line,
            message: truncate(message),
        });
    }

    for collector in collectors.into_iter().flatten() {
        if collector.get("outcome").and_then(Value::as_str) != Some("failed") {
            continue;
        }
        let nodeid = collector.get("nodeid").and_then(Value::as_str).unwrap_or("");
        if nodeid.is_empty() {
            continue;
        }
        let longrepr = collector
            .get("longrepr")
            .and_then(Value::as_str)
            .unwrap_or("collection failed");
        let node_file = nodeid.split("::").next().unwrap_or(nodeid);
        failures.push(TestFailure {
            file: paths.attribute(node_file),
            test_name: "<collection>".to_string(),
            line: extract_line(longrepr),
            message: truncate(longrepr),
        });
    }

    let summary = object.get("summary");
    Some(TestReport {
        total: as_u32(summary.and_then(|s| s.get("total"))).unwrap_or(0),
        passed: as_u32(summary.and_then(|s| s.get("passed"))).unwrap_or(0),
        failures,
    })
}

fn stack_frame_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(?((?:/|\./)?[^\s():]+\.[cm]?[jt]sx?):(\d+):\d+\)?").ok())
        .as_ref()
}

/// First stack frame in `text` that lies inside the workspace.
fn first_workspace_frame(text: &str, paths: &PathMapper) -> Option<(String, u32)> {
    stack_frame_regex()?.captures_iter(text).find_map(|caps| {
        let file = paths.relativize(caps.get(1)?.as_str())?;
        let line = caps.get(2)?.as_str().parse().ok()?;
        Some((file, line))
    })
}

/// jest `--json`: `testResults[].assertionResults[]` (aliases accepted).
pub fn parse_jest(report: &Value, paths: &PathMapper) -> Option<TestReport> {
    let object = report.as_object()?;
    let suites = object.get("testResults").and_then(Value::as_array)?;

    let mut failures = Vec::new();
    for suite in suites {
        let suite_path = suite
            .get("name")
            .or_else(|| suite.get("testFilePath"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let suite_file = paths.attribute(suite_path);
        let assertions = suite
            .get("assertionResults")
            .or_else(|| suite.get("testResults"))
            .and_then(Value::as_array);

        let mut suite_failed_assertions = 0;
        for assertion in assertions.into_iter().flatten() {
            if assertion.get("status").and_then(Value::as_str) != Some("failed") {
                continue;
            }
            suite_failed_assertions += 1;
            let test_name = assertion
                .get("fullName")
                .or_else(|| assertion.get("title"))
                .and_then(Value::as_str)
                .unwrap_or("<unnamed>")
                .to_string();
            let message = assertion
                .get("failureMessages")
                .and_then(Value::as_array)
                .map(|msgs| {
                    msgs.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            let (file, line) = first_workspace_frame(&message, paths).unwrap_or_else(|| {
                let line = as_u32(assertion.get("location").and_then(|l| l.get("line")))
                    .unwrap_or_else(|| extract_line(&message));
                (suite_file.clone(), line)
            });
            failures.push(TestFailure {
                file,
                test_name,
                line,
                message: truncate(&message),
            });
        }

        let suite_status = suite.get("status").and_then(Value::as_str);
        if suite_status == Some("failed") && suite_failed_assertions == 0 {
            let message = suite
                .get("message")
                .or_else(|| suite.get("failureMessage"))
                .and_then(Value::as_str)
                .unwrap_or("test suite failed to run");
            let (file, line) = first_workspace_frame(message, paths)
                .unwrap_or_else(|| (suite_file.clone(), extract_line(message)));
            failures.push(TestFailure {
                file,
                test_name: "<suite>".to_string(),
                line,
                message: truncate(message),
            });
        }
    }

    Some(TestReport {
        total: as_u32(object.get("numTotalTests")).unwrap_or(0),
        passed: as_u32(object.get("numPassedTests")).unwrap_or(0),
        failures,
    })
}

fn failed_line_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^FAILED (.+?)::(.+?) - (.+)$").ok())
        .as_ref()
}

/// Plain-text fallback: `FAILED path::test - message` summary lines.
pub fn parse_failed_lines(output: &str, paths: &PathMapper) -> Vec<TestFailure> {
    let Some(re) = failed_line_regex() else {
        return Vec::new();
    };
    re.captures_iter(output)
        .filter_map(|caps| {
            let file = caps.get(1)?.as_str().trim();
            let test_name = caps.get(2)?.as_str().trim().to_string();
            let message = caps.get(3)?.as_str().trim().to_string();
            Some(TestFailure {
                file: paths.attribute(file),
                test_name,
                line: extract_line(&message),
                message,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapper() -> PathMapper {
        PathMapper::new(["/workspace".to_string(), "/home/u/ws".to_string()])
    }

    #[test]
    fn test_relativize() {
        let m = mapper();
        assert_eq!(m.relativize("/workspace/app/x.py").as_deref(), Some("app/x.py"));
        assert_eq!(m.relativize("/home/u/ws/y.py").as_deref(), Some("y.py"));
        assert_eq!(m.relativize("./tests/t.py").as_deref(), Some("tests/t.py"));
        assert_eq!(m.relativize("/usr/lib/python3.11/json/__init__.py"), None);
        assert_eq!(
            m.relativize("/workspace/.venv/lib/site-packages/x.py"),
            None
        );
    }

    #[test]
    fn test_paths_outside_workspace_are_unattributed() {
        let m = mapper();
        assert_eq!(m.relativize("../victim.py"), None);
        assert_eq!(m.relativize("/workspace/../etc/passwd"), None);
        assert_eq!(m.attribute("/tmp/elsewhere/victim.py"), "unknown");

        let report = json!({
            "summary": {"total": 2},
            "tests": [
                {"nodeid": "/tmp/elsewhere/victim.py::test_x", "outcome": "failed",
                 "call": {"outcome": "failed", "longrepr": "boom"}},
                {"nodeid": "../../victim.py::test_y", "outcome": "failed",
                 "call": {"outcome": "failed", "longrepr": "boom"}}
            ],
            "collectors": [
                {"nodeid": "/etc/cron.d/job", "outcome": "failed", "longrepr": "E   SyntaxError"}
            ]
        });
        let parsed = parse_pytest(&report, &m).unwrap();
        assert_eq!(parsed.failures.len(), 3);
        assert!(parsed.failures.iter().all(|f| f.file == "unknown"));

        let out = "FAILED /tmp/elsewhere/victim.py::test_z - AssertionError\n";
        assert_eq!(parse_failed_lines(out, &m)[0].file, "unknown");

        let jest = json!({
            "testResults": [{
                "name": "/home/other/evil.test.js",
                "status": "failed",
                "assertionResults": [{"fullName": "t", "status": "failed", "failureMessages": ["Error: x"]}]
            }]
        });
        assert_eq!(parse_jest(&jest, &m).unwrap().failures[0].file, "unknown");
    }

    #[test]
    fn test_pytest_prefers_crash_location_in_workspace() {
        let report = json!({
            "summary": {"total": 3, "passed": 1, "failed": 2},
            "tests": [
                {"nodeid": "tests/test_calc.py::test_ok", "outcome": "passed"},
                {
                    "nodeid": "tests/test_calc.py::test_add",
                    "outcome": "failed",
                    "call": {
                        "outcome": "failed",
                        "crash": {"path": "/workspace/calc.py", "lineno": 4, "message": "TypeError: unsupported operand"},
                        "longrepr": "long text"
                    }
                },
                {
                    "nodeid": "tests/test_calc.py::test_div",
                    "outcome": "failed",
                    "call": {
                        "outcome": "failed",
                        "crash": {"path": "/usr/lib/python3.11/fractions.py", "lineno": 90, "message": "AssertionError"},
                        "longrepr": "tests/test_calc.py:12: AssertionError"
                    }
                }
            ]
        });
        let parsed = parse_pytest(&report, &mapper()).unwrap();
        assert_eq!(parsed.total, 3);
        assert_eq!(parsed.passed, 1);
        assert_eq!(parsed.failures.len(), 2);
        assert_eq!(parsed.failures[0].file, "calc.py");
        assert_eq!(parsed.failures[0].line, 4);
        assert_eq!(parsed.failures[0].test_name, "test_add");
        assert_eq!(parsed.failures[1].file, "tests/test_calc.py");
        assert_eq!(parsed.failures[1].line, 12);
    }

    #[test]
    fn test_pytest_setup_error_and_collector() {
        let report = json!({
            "summary": {"total": 1},
            "tests": [{
                "nodeid": "tests/test_db.py::test_q",
                "outcome": "error",
                "setup": {"outcome": "failed", "longrepr": "fixture 'db' not found"}
            }],
            "collectors": [{
                "nodeid": "tests/test_bad.py",
                "outcome": "failed",
                "longrepr": "E   ModuleNotFoundError: No module named 'foo'"
            }]
        });
        let parsed = parse_pytest(&report, &mapper()).unwrap();
        assert_eq!(parsed.failures.len(), 2);
        assert_eq!(parsed.failures[0].message, "fixture 'db' not found");
        assert_eq!(parsed.failures[1].file, "tests/test_bad.py");
        assert_eq!(parsed.failures[1].test_name, "<collection>");
    }

    #[test]
    fn test_jest_assertions_and_suite_failures() {
        let report = json!({
            "numTotalTests": 2,
            "numPassedTests": 1,
            "testResults": [
                {
                    "name": "/workspace/src/sum.test.js",
                    "status": "failed",
                    "assertionResults": [
                        {"fullName": "adds", "status": "passed", "failureMessages": []},
                        {
                            "fullName": "subtracts",
                            "status": "failed",
                            "failureMessages": ["Error: expect(received).toBe(expected)\n    at Object.<anonymous> (/workspace/src/sum.js:7:10)"]
                        }
                    ]
                },
                {
                    "testFilePath": "/workspace/src/broken.test.js",
                    "status": "failed",
                    "message": "SyntaxError: Unexpected token (3:4)",
                    "testResults": []
                }
            ]
        });
        let parsed = parse_jest(&report, &mapper()).unwrap();
        assert_eq!(parsed.total, 2);
        assert_eq!(parsed.failures.len(), 2);
        assert_eq!(parsed.failures[0].file, "src/sum.js");
        assert_eq!(parsed.failures[0].line, 7);
        assert_eq!(parsed.failures[1].file, "src/broken.test.js");
        assert_eq!(parsed.failures[1].test_name, "<suite>");
    }

    #[test]
    fn test_failed_line_fallback() {
        let out = "===== short test summary info =====\n\
                   FAILED tests/test_a.py::test_one - AssertionError: assert 1 == 2\n\
                   FAILED tests/test_b.py::TestX::test_two - ImportError: bad\n\
                   1 failed\n";
        let failures = parse_failed_lines(out, &mapper());
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].file, "tests/test_a.py");
        assert_eq!(failures[0].test_name, "test_one");
        assert_eq!(failures[1].test_name, "TestX::test_two");
    }
}
