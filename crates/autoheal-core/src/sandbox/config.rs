//! Sandbox resource limits and runtime images.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Language;

/// Configuration for sandboxed test execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container runtime executable.
    pub runtime: String,
    /// Memory ceiling, in the runtime's size syntax.
    pub memory: String,
    /// CPU ceiling, in cores.
    pub cpus: String,
    /// Hard wall-clock limit for one test run (seconds).
    pub timeout_secs: u64,
    /// Size of the writable `/tmp` scratch area.
    pub tmp_size: String,
    /// Size of the writable `/root` home area.
    pub home_size: String,
    pub python_image: String,
    pub javascript_image: String,
    /// Limit for the one-off runtime availability probe (seconds).
    pub probe_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            memory: "512m".to_string(),
            cpus: "1.0".to_string(),
            timeout_secs: 120,
            tmp_size: "100m".to_string(),
            home_size: "50m".to_string(),
            python_image: "python:3.11-slim".to_string(),
            javascript_image: "node:18-slim".to_string(),
            probe_timeout_secs: 10,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn image_for(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python_image,
            Language::JavaScript => &self.javascript_image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = SandboxConfig::default();
        assert_eq!(c.memory, "512m");
        assert_eq!(c.cpus, "1.0");
        assert_eq!(c.timeout(), Duration::from_secs(120));
        assert_eq!(c.image_for(Language::JavaScript), "node:18-slim");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c: SandboxConfig = toml::from_str("timeout_secs = 30\n").unwrap();
        assert_eq!(c.timeout_secs, 30);
        assert_eq!(c.python_image, "python:3.11-slim");
    }
}
