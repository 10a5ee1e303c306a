//! Test-run shell scripts and sentinel-delimited report recovery.
//!
//! The script prints the runner's JSON report between [`REPORT_START`] and
//! [`REPORT_END`] so it can be recovered from combined output even when the
//! report file lives inside a container that no longer exists.

use crate::domain::Language;

pub const REPORT_START: &str = "---REPORT_START---";
pub const REPORT_END: &str = "---REPORT_END---";

/// Marker printed by the script when no interpreter is on `PATH`.
pub const INTERPRETER_MISSING: &str = "autoheal: interpreter not found";

fn emit_report(report_path: &str) -> String {
    format!(
        "echo '{REPORT_START}'; cat '{report_path}' 2>/dev/null || echo '{{}}'; echo '{REPORT_END}'"
    )
}

/// Build the test script for `language`.
///
/// Dependency installation is best-effort and only attempted when
/// `install_dependencies` is set. The script exits with the runner's status.
pub fn test_script(language: Language, report_path: &str, install_dependencies: bool) -> String {
    let mut lines: Vec<String> = Vec::new();
    match language {
        Language::Python => {
            lines.push("PY=$(command -v python3 || command -v python)".to_string());
            lines.push(format!(
                "[ -n \"$PY\" ] || {{ echo '{INTERPRETER_MISSING}'; exit 127; }}"
            ));
            if install_dependencies {
                lines.push(
                    "[ -f requirements.txt ] && \"$PY\" -m pip install --user -q -r requirements.txt >/dev/null 2>&1 || true"
                        .to_string(),
                );
                lines.push(
                    "\"$PY\" -c 'import pytest_jsonreport' >/dev/null 2>&1 || \"$PY\" -m pip install --user -q pytest pytest-json-report >/dev/null 2>&1 || true"
                        .to_string(),
                );
            }
            lines.push("if \"$PY\" -c 'import pytest_jsonreport' >/dev/null 2>&1; then".to_string());
            lines.push(format!(
                "  \"$PY\" -m pytest -p no:cacheprovider --json-report --json-report-file='{report_path}' -v --tb=short 2>&1"
            ));
            lines.push("else".to_string());
            lines.push("  \"$PY\" -m pytest -p no:cacheprovider -v --tb=short -rfE 2>&1".to_string());
            lines.push("fi".to_string());
        }
        Language::JavaScript => {
            lines.push(format!(
                "command -v node >/dev/null 2>&1 || {{ echo '{INTERPRETER_MISSING}'; exit 127; }}"
            ));
            if install_dependencies {
                lines.push(
                    "[ -f package.json ] && npm install --silent >/dev/null 2>&1 || true".to_string(),
                );
            }
            lines.push(format!(
                "npx --no-install jest --json --outputFile='{report_path}' --forceExit --no-coverage 2>&1"
            ));
        }
    }
    lines.push("status=$?".to_string());
    lines.push(emit_report(report_path));
    lines.push("exit $status".to_string());
    lines.join("\n")
}

/// Recover the JSON report printed between the sentinels.
///
/// Returns `None` when the sentinels are absent, the payload is not JSON,
/// or it is an empty object (the runner wrote no report).
pub fn extract_report(output: &str) -> Option<serde_json::Value> {
    let start = output.find(REPORT_START)? + REPORT_START.len();
    let end = start + output[start..].find(REPORT_END)?;
    let value: serde_json::Value = serde_json::from_str(output[start..end].trim()).ok()?;
    match value.as_object() {
        Some(map) if map.is_empty() => None,
        Some(_) => Some(value),
        None => None,
    }
}

/// Output with the sentinel block removed.
pub fn strip_report(output: &str) -> String {
    match (output.find(REPORT_START), output.find(REPORT_END)) {
        (Some(start), Some(end)) if end >= start => {
            let mut s = output[..start].to_string();
            s.push_str(&output[end + REPORT_END.len()..]);
            s
        }
        _ => output.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_report() {
        let out = "collected 2 items\n---REPORT_START---\n{\"summary\": {\"total\": 2}}\n---REPORT_END---\n";
        let v = extract_report(out).unwrap();
        assert_eq!(v["summary"]["total"], 2);
    }

    #[test]
    fn test_empty_or_missing_report() {
        assert!(extract_report("---REPORT_START---\n{}\n---REPORT_END---").is_none());
        assert!(extract_report("no sentinels").is_none());
        assert!(extract_report("---REPORT_START---\nnot json\n---REPORT_END---").is_none());
    }

    #[test]
    fn test_strip_report() {
        let out = "a\n---REPORT_START---\n{}\n---REPORT_END---\nb";
        assert_eq!(strip_report(out), "a\n\nb");
    }

    #[test]
    fn test_scripts_preserve_runner_status() {
        let py = test_script(Language::Python, "/tmp/r.json", true);
        assert!(py.contains("--json-report-file='/tmp/r.json'"));
        assert!(py.contains("requirements.txt"));
        assert!(py.trim_end().ends_with("exit $status"));

        let js = test_script(Language::JavaScript, "/tmp/r.json", false);
        assert!(js.contains("jest --json"));
        assert!(!js.contains("npm install"));
    }
}
