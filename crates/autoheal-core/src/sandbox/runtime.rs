//! Container runtime probing and invocation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::OnceCell;

use super::config::SandboxConfig;

/// Mount point of the workspace inside the container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Lazily probed container runtime. The probe runs once per instance.
#[derive(Debug)]
pub struct SandboxRuntime {
    program: String,
    probe_timeout: Duration,
    available: OnceCell<bool>,
}

impl SandboxRuntime {
    pub fn new(program: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            probe_timeout,
            available: OnceCell::new(),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(
            config.runtime.clone(),
            Duration::from_secs(config.probe_timeout_secs),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether `<runtime> info` succeeds within the probe timeout.
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let probe = Command::new(&self.program)
                    .arg("info")
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status();
                match tokio::time::timeout(self.probe_timeout, probe).await {
                    Ok(Ok(status)) => status.success(),
                    _ => false,
                }
            })
            .await
    }

    /// Force-remove a container by name. Best effort.
    pub async fn force_remove(&self, name: &str) {
        let result = Command::new(&self.program)
            .args(["rm", "-f", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            tracing::warn!(container = %name, error = %e, "failed to remove container");
        }
    }
}

/// Arguments for `<runtime> run` with the fixed isolation flags: no
/// network, read-only root with bounded tmpfs scratch, memory and CPU
/// ceilings, read-only workspace mount, and removal on exit.
pub fn run_args(
    config: &SandboxConfig,
    container_name: &str,
    workspace: &Path,
    image: &str,
    script: &str,
) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        container_name.to_string(),
        "--network".to_string(),
        "none".to_string(),
        format!("--memory={}", config.memory),
        format!("--cpus={}", config.cpus),
        "--read-only".to_string(),
        "--tmpfs".to_string(),
        format!("/tmp:size={},mode=1777", config.tmp_size),
        "--tmpfs".to_string(),
        format!("/root:size={}", config.home_size),
        "-e".to_string(),
        "HOME=/root".to_string(),
        "-e".to_string(),
        "PYTHONDONTWRITEBYTECODE=1".to_string(),
        "-v".to_string(),
        format!("{}:{CONTAINER_WORKDIR}:ro", workspace.display()),
        "-w".to_string(),
        CONTAINER_WORKDIR.to_string(),
        image.to_string(),
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
    ]
}
