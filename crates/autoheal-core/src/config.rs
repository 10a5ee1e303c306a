//! Pipeline configuration.
//!
//! Every section defaults independently, so a TOML file only needs the keys
//! it changes. Secrets are never read from the file: they come from the
//! environment via [`HealConfig::apply_env`].
//!
//! ```toml
//! results_dir = "results"
//!
//! [healing]
//! max_iterations = 5
//!
//! [sandbox]
//! runtime = "docker"
//! memory = "512m"
//! timeout_secs = 120
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{HealError, Result};
use crate::git::GitConfig;
use crate::orchestrator::HealingConfig;
use crate::registry::RegistryConfig;
use crate::repair::RepairConfig;
use crate::report::ScoringPolicy;
use crate::sandbox::SandboxConfig;
use crate::scanner::AnalyzerConfig;
use crate::workspace::WorkspaceConfig;

/// Repair-service API key.
pub const ENV_REPAIR_API_KEY: &str = "AUTOHEAL_REPAIR_API_KEY";
/// Fallback for [`ENV_REPAIR_API_KEY`].
pub const ENV_MISTRAL_API_KEY: &str = "MISTRAL_API_KEY";
/// Token injected into HTTPS remotes for clone and push.
pub const ENV_GIT_TOKEN: &str = "AUTOHEAL_GIT_TOKEN";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    pub workspace: WorkspaceConfig,
    pub sandbox: SandboxConfig,
    pub analyzer: AnalyzerConfig,
    pub git: GitConfig,
    pub repair: RepairConfig,
    pub healing: HealingConfig,
    pub scoring: ScoringPolicy,
    pub registry: RegistryConfig,
    pub results_dir: PathBuf,
    #[serde(skip)]
    pub git_token: Option<String>,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig::default(),
            sandbox: SandboxConfig::default(),
            analyzer: AnalyzerConfig::default(),
            git: GitConfig::default(),
            repair: RepairConfig::default(),
            healing: HealingConfig::default(),
            scoring: ScoringPolicy::default(),
            registry: RegistryConfig::default(),
            results_dir: PathBuf::from("results"),
            git_token: None,
        }
    }
}

impl std::fmt::Debug for HealConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealConfig")
            .field("workspace", &self.workspace)
            .field("sandbox", &self.sandbox)
            .field("analyzer", &self.analyzer)
            .field("git", &self.git)
            .field("repair", &self.repair)
            .field("healing", &self.healing)
            .field("scoring", &self.scoring)
            .field("registry", &self.registry)
            .field("results_dir", &self.results_dir)
            .field("git_token", &self.git_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HealConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: HealConfig =
            toml::from_str(contents).map_err(|e| HealError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or defaults when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    HealError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&contents)
            }
            None => Ok(Self::default()),
        }
    }

    /// Fill secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Fill secrets from `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty(ENV_REPAIR_API_KEY).or_else(|| non_empty(ENV_MISTRAL_API_KEY)) {
            self.repair.api_key = Some(key);
        }
        if let Some(token) = non_empty(ENV_GIT_TOKEN) {
            self.git_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.healing.max_iterations == 0 {
            return Err(HealError::Config(
                "healing.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(HealError::Config(
                "sandbox.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.git.network_timeout_secs == 0 || self.workspace.clone_timeout_secs == 0 {
            return Err(HealError::Config(
                "git and clone timeouts must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HealConfig::default();
        assert_eq!(config.healing.max_iterations, 5);
        assert_eq!(config.sandbox.memory, "512m");
        assert_eq!(config.sandbox.timeout_secs, 120);
        assert_eq!(config.scoring.base, 100);
        assert_eq!(config.repair.model, "codestral-latest");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = HealConfig::from_toml_str(
            "results_dir = \"/srv/results\"\n[healing]\nmax_iterations = 3\n[sandbox]\ncpus = \"2.0\"\n",
        )
        .unwrap();
        assert_eq!(config.healing.max_iterations, 3);
        assert!(config.healing.quarantine_failed_files);
        assert_eq!(config.sandbox.cpus, "2.0");
        assert_eq!(config.sandbox.memory, "512m");
        assert_eq!(config.results_dir, PathBuf::from("/srv/results"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = HealConfig::from_toml_str("[healing]\nmax_iterations = 0\n").unwrap_err();
        assert!(matches!(err, HealError::Config(_)));
        let err = HealConfig::from_toml_str("[healing]\nmax_iterations = \"five\"\n").unwrap_err();
        assert!(matches!(err, HealError::Config(_)));
    }

    #[test]
    fn test_env_secrets() {
        let mut config = HealConfig::default();
        config.apply_env_from(|key| match key {
            ENV_MISTRAL_API_KEY => Some("mk".to_string()),
            ENV_GIT_TOKEN => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.repair.api_key.as_deref(), Some("mk"));
        assert!(config.git_token.is_none());

        config.apply_env_from(|key| (key == ENV_GIT_TOKEN).then(|| "ghp_secret".to_string()));
        assert!(!format!("{config:?}").contains("ghp_secret"));

        config.apply_env_from(|key| (key == ENV_REPAIR_API_KEY).then(|| "rk".to_string()));
        assert_eq!(config.repair.api_key.as_deref(), Some("rk"));
    }

    #[test]
    fn test_secrets_not_read_from_file() {
        let config =
            HealConfig::from_toml_str("[repair]\napi_key = \"leak\"\nmodel = \"m\"\n").unwrap();
        assert!(config.repair.api_key.is_none());
        assert_eq!(config.repair.model, "m");
    }
}
