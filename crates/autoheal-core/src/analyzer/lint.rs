//! External linter (flake8) integration.
//!
//! The linter runs once per scan over every Python source file. Only the
//! unused-import, redefinition and unused-variable rules are selected.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Rules passed to `--select`.
pub const SELECTED_RULES: &str = "F401,F811,F841";
const FORMAT: &str = "%(path)s::%(row)d::%(code)s::%(text)s";

/// Errors produced while running the external linter.
#[derive(Debug, thiserror::Error)]
pub enum LintError {
    #[error("linter not installed: {0}")]
    Unavailable(String),

    #[error("linter timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("linter exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One linter finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintFinding {
    /// Workspace-relative, `/`-separated.
    pub file: String,
    pub line: u32,
    pub code: String,
    pub text: String,
}

impl LintFinding {
    pub fn remediation_hint(&self) -> String {
        match self.code.as_str() {
            "F401" => format!("Remove the unused import at line {}", self.line),
            "F811" => format!("Remove the duplicate definition at line {}", self.line),
            "F841" => format!("Remove or use the unused variable at line {}", self.line),
            _ => format!("Address {} at line {}", self.code, self.line),
        }
    }
}

/// Parse `path::row::code::text` lines; anything else is ignored.
pub fn parse_findings(stdout: &str) -> Vec<LintFinding> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim().splitn(4, "::");
            let file = parts.next()?.trim();
            let row = parts.next()?.trim().parse::<u32>().ok()?;
            let code = parts.next()?.trim();
            let text = parts.next()?.trim();
            Some(LintFinding {
                file: file.trim_start_matches("./").replace('\\', "/"),
                line: row,
                code: code.to_string(),
                text: text.to_string(),
            })
        })
        .collect()
}

async fn invoke(
    program: &str,
    prefix: &[&str],
    root: &Path,
    files: &[String],
    timeout: Duration,
) -> Result<std::process::Output, LintError> {
    let child = Command::new(program)
        .args(prefix)
        .arg(format!("--select={SELECTED_RULES}"))
        .arg(format!("--format={FORMAT}"))
        .args(files)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| LintError::Timeout {
            secs: timeout.as_secs(),
        })?
        .map_err(LintError::from)
}

/// Run flake8 over `files` (relative to `root`).
///
/// Tries the `flake8` executable first, then `python3 -m flake8`.
pub async fn run_flake8(
    root: &Path,
    files: &[String],
    timeout: Duration,
) -> Result<Vec<LintFinding>, LintError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let output = match invoke("flake8", &[], root, files, timeout).await {
        Err(LintError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            match invoke("python3", &["-m", "flake8"], root, files, timeout).await {
                Err(LintError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(LintError::Unavailable("flake8 and python3 not found".into()));
                }
                other => other?,
            }
        }
        other => other?,
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("No module named flake8") {
        return Err(LintError::Unavailable(stderr.trim().to_string()));
    }
    // flake8 exits 1 when it reports findings.
    match output.status.code() {
        Some(0) | Some(1) => Ok(parse_findings(&String::from_utf8_lossy(&output.stdout))),
        code => Err(LintError::Failed {
            status: code.unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_findings() {
        let out = "./app/main.py::3::F401::'os' imported but unused\n\
                   garbage line\n\
                   lib/util.py::12::F841::local variable 'x' is assigned to but never used\n";
        let findings = parse_findings(out);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].file, "app/main.py");
        assert_eq!(findings[0].line, 3);
        assert_eq!(findings[0].code, "F401");
        assert_eq!(findings[1].file, "lib/util.py");
        assert!(findings[1].text.contains("never used"));
    }

    #[test]
    fn test_text_may_contain_separator() {
        let findings = parse_findings("a.py::1::F811::redefinition of 'x' from line 1::extra\n");
        assert_eq!(findings[0].text, "redefinition of 'x' from line 1::extra");
    }

    #[test]
    fn test_hints_by_code() {
        let f = LintFinding {
            file: "a.py".into(),
            line: 4,
            code: "F401".into(),
            text: "unused".into(),
        };
        assert_eq!(f.remediation_hint(), "Remove the unused import at line 4");
    }

    #[tokio::test]
    async fn test_no_files_is_empty() {
        let dir = std::env::temp_dir();
        let out = run_flake8(&dir, &[], Duration::from_secs(1)).await.unwrap();
        assert!(out.is_empty());
    }
}
