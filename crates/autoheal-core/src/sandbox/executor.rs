//! Test execution with sandbox, timeout and direct fallback.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use super::config::SandboxConfig;
use super::report::{parse_failed_lines, parse_structured, PathMapper};
use super::runtime::{run_args, SandboxRuntime, CONTAINER_WORKDIR};
use super::script::{extract_report, strip_report, test_script, INTERPRETER_MISSING};
use crate::domain::{
    ExecutionMode, ExecutionResult, Language, TestFailure, TestReport, TestVerdict,
};
use crate::obs;

/// Report path inside the container's `/tmp` tmpfs.
const CONTAINER_REPORT_PATH: &str = "/tmp/autoheal_report.json";

/// Lines of output kept when a failure has no better description.
const OUTPUT_TAIL_LINES: usize = 20;

/// Runs a project's test suite and returns structured results.
///
/// Never returns an error: spawn failures, timeouts and missing runners are
/// all expressed in the returned [`ExecutionResult`].
#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn run(&self, workspace: &Path, language: Language) -> ExecutionResult;
}

/// Raw outcome of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// -1 on timeout, signal, or spawn failure.
    pub exit_code: i32,
    pub succeeded: bool,
    pub timed_out: bool,
    pub mode: ExecutionMode,
    pub duration_ms: u64,
}

/// Executes scripts in a container when the runtime is available, else
/// directly on the host with a logged degradation.
#[derive(Debug)]
pub struct SandboxedExecutor {
    config: SandboxConfig,
    runtime: SandboxRuntime,
}

impl SandboxedExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        let runtime = SandboxRuntime::from_config(&config);
        Self { config, runtime }
    }

    pub fn with_runtime(config: SandboxConfig, runtime: SandboxRuntime) -> Self {
        Self { config, runtime }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `script` with `sh -c` against `workspace`, bounded by the
    /// configured timeout.
    pub async fn run_script(&self, workspace: &Path, image: &str, script: &str) -> CommandOutput {
        let sandboxed = self.runtime.is_available().await;
        self.run_in(workspace, image, script, sandboxed).await
    }

    async fn run_in(
        &self,
        workspace: &Path,
        image: &str,
        script: &str,
        sandboxed: bool,
    ) -> CommandOutput {
        if sandboxed {
            self.run_sandboxed(workspace, image, script).await
        } else {
            obs::emit_sandbox_degraded(self.runtime.program(), &workspace.display().to_string());
            self.run_direct(workspace, script).await
        }
    }

    async fn run_sandboxed(&self, workspace: &Path, image: &str, script: &str) -> CommandOutput {
        let workspace = std::path::absolute(workspace).unwrap_or_else(|_| workspace.to_path_buf());
        let name = format!("autoheal-{}", uuid::Uuid::new_v4().simple());
        let mut command = Command::new(self.runtime.program());
        command.args(run_args(&self.config, &name, &workspace, image, script));

        let output = self.execute(command, ExecutionMode::Sandboxed).await;
        if output.timed_out {
            self.runtime.force_remove(&name).await;
        }
        output
    }

    async fn run_direct(&self, workspace: &Path, script: &str) -> CommandOutput {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(script)
            .current_dir(workspace)
            .env("PYTHONDONTWRITEBYTECODE", "1");
        self.execute(command, ExecutionMode::Direct).await
    }

    async fn execute(&self, mut command: Command, mode: ExecutionMode) -> CommandOutput {
        let start = Instant::now();
        let timeout = self.config.timeout();
        // Own process group, so a timeout also reaches the runners `sh` forks.
        #[cfg(unix)]
        command.process_group(0);
        let spawned = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput {
                    stdout: String::new(),
                    stderr: format!("failed to spawn test command: {e}"),
                    exit_code: -1,
                    succeeded: false,
                    timed_out: false,
                    mode,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        };

        let group = child.id();
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                CommandOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    exit_code,
                    succeeded: output.status.success(),
                    timed_out: false,
                    mode,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
            Ok(Err(e)) => CommandOutput {
                stdout: String::new(),
                stderr: format!("failed to collect test output: {e}"),
                exit_code: -1,
                succeeded: false,
                timed_out: false,
                mode,
                duration_ms: start.elapsed().as_millis() as u64,
            },
            Err(_elapsed) => {
                kill_process_group(group);
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    mode = ?mode,
                    "test execution timed out"
                );
                CommandOutput {
                    stdout: String::new(),
                    stderr: format!(
                        "execution timed out after {} seconds",
                        timeout.as_secs()
                    ),
                    exit_code: -1,
                    succeeded: false,
                    timed_out: true,
                    mode,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        }
    }
}

#[async_trait]
impl TestExecutor for SandboxedExecutor {
    async fn run(&self, workspace: &Path, language: Language) -> ExecutionResult {
        // The direct-mode report lives outside the workspace so the working
        // tree stays clean for git.
        let scratch = tempfile::tempdir().ok();
        let sandboxed = self.runtime.is_available().await;
        let report_path = match (&scratch, sandboxed) {
            (_, true) => CONTAINER_REPORT_PATH.to_string(),
            (Some(dir), false) => dir.path().join("report.json").display().to_string(),
            (None, false) => std::env::temp_dir()
                .join(format!("autoheal-report-{}.json", uuid::Uuid::new_v4().simple()))
                .display()
                .to_string(),
        };

        let script = test_script(language, &report_path, sandboxed);
        let output = self
            .run_in(workspace, self.config.image_for(language), &script, sandboxed)
            .await;

        let mut roots = vec![CONTAINER_WORKDIR.to_string(), workspace.display().to_string()];
        if let Ok(canonical) = workspace.canonicalize() {
            roots.push(canonical.display().to_string());
        }
        interpret(
            language,
            output,
            &PathMapper::new(roots),
            self.config.timeout_secs,
        )
    }
}

/// SIGKILL every process left in the group led by `leader`.
#[cfg(unix)]
fn kill_process_group(leader: Option<u32>) {
    let Some(pgid) = leader.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created for this
    // command and is kept alive by its remaining members.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(
            pgid,
            error = %std::io::Error::last_os_error(),
            "process group already gone"
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_leader: Option<u32>) {}

fn output_tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}

fn runner_missing(language: Language, output: &CommandOutput) -> bool {
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    if output.exit_code == 127 || combined.contains(INTERPRETER_MISSING) {
        return true;
    }
    match language {
        Language::Python => combined.contains("No module named pytest"),
        Language::JavaScript => {
            combined.contains("could not determine executable to run")
                || combined.contains("jest: not found")
                || combined.contains("command not found: jest")
        }
    }
}

fn nothing_collected(language: Language, output: &CommandOutput) -> bool {
    match language {
        // pytest: "no tests collected"
        Language::Python => output.exit_code == 5,
        Language::JavaScript => output.stdout.contains("No tests found"),
    }
}

/// Turn raw command output into an [`ExecutionResult`].
pub fn interpret(
    language: Language,
    output: CommandOutput,
    paths: &PathMapper,
    timeout_secs: u64,
) -> ExecutionResult {
    let structured = extract_report(&output.stdout)
        .and_then(|report| parse_structured(language, &report, paths));

    let verdict = if output.timed_out {
        TestVerdict::TimedOut {
            after_secs: timeout_secs,
        }
    } else if runner_missing(language, &output) {
        TestVerdict::NoTestsDiscoverable {
            reason: format!("{language} test runner not available"),
            runner_missing: true,
        }
    } else if nothing_collected(language, &output)
        && structured.as_ref().map_or(true, |r| r.failures.is_empty())
    {
        TestVerdict::NoTestsDiscoverable {
            reason: "no tests collected".to_string(),
            runner_missing: false,
        }
    } else {
        verdict_from_failures(&output, structured.as_ref(), paths)
    };

    ExecutionResult {
        language,
        stdout: strip_report(&output.stdout),
        stderr: output.stderr,
        exit_code: output.exit_code,
        succeeded: output.succeeded && matches!(verdict, TestVerdict::Passed),
        structured_report: structured,
        mode: output.mode,
        verdict,
        duration_ms: output.duration_ms,
    }
}

fn verdict_from_failures(
    output: &CommandOutput,
    structured: Option<&TestReport>,
    paths: &PathMapper,
) -> TestVerdict {
    let mut failures = match structured {
        Some(report) => report.failures.clone(),
        None => parse_failed_lines(&output.stdout, paths),
    };
    if failures.is_empty() && output.exit_code == 0 {
        return TestVerdict::Passed;
    }
    if failures.is_empty() {
        // Non-zero exit with nothing attributable: keep the evidence.
        let tail = output_tail(&strip_report(&format!("{}\n{}", output.stdout, output.stderr)));
        failures.push(TestFailure {
            file: crate::domain::Defect::UNKNOWN_FILE.to_string(),
            test_name: "<runner>".to_string(),
            line: 0,
            message: format!("test runner exited with status {}\n{tail}", output.exit_code),
        });
    }
    TestVerdict::Failed { failures }
}
