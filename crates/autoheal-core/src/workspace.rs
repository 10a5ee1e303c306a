//! Run-scoped working copies of remote repositories.
//!
//! Each run owns `<base_dir>/<run_id>/<repo_name>`; nothing else writes
//! there, so no locking is needed. A resumed run keeps its id and can pick
//! its retained clone back up. Directories are force-removed (read-only
//! bits cleared first) before a fresh clone and on release.

use std::path::{Path, PathBuf};
use std::time::Duration;

use autoheal_state::RunId;
use serde::{Deserialize, Serialize};
use url::Url;
use walkdir::WalkDir;

use crate::domain::{HealError, Result};
use crate::git::{authenticated_url, run_git, scrub_url, GitCredentials, GitInvokeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub base_dir: PathBuf,
    pub clone_timeout_secs: u64,
    /// Reopen an existing clone of the same remote instead of recloning.
    pub reuse_existing: bool,
    /// `--depth` for the clone; full history when `None`.
    pub clone_depth: Option<u32>,
    /// Keep the working copy after the run finishes.
    pub retain_after_run: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir().join("autoheal_repos"),
            clone_timeout_secs: 120,
            reuse_existing: false,
            clone_depth: None,
            retain_after_run: false,
        }
    }
}

/// A materialized working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub run_id: RunId,
    pub repo_name: String,
    pub path: PathBuf,
    /// Remote URL with credentials removed.
    pub remote_url: String,
    pub reused: bool,
}

/// Repository name: last path segment of the URL without `.git`.
pub fn repo_name(remote_url: &str) -> Result<String> {
    let trimmed = remote_url.trim().trim_end_matches('/');
    let last = match Url::parse(trimmed) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .unwrap_or_default(),
        // scp-style `git@host:org/repo.git` or a local path
        Err(_) => trimmed
            .rsplit(['/', ':', '\\'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let name = last.strip_suffix(".git").unwrap_or(&last).to_string();
    if name.is_empty() || name == "." || name == ".." {
        return Err(HealError::InvalidWorkspace(format!(
            "cannot derive a repository name from {:?}",
            scrub_url(remote_url)
        )));
    }
    Ok(name)
}

/// Delete `path` recursively, clearing read-only permissions first. A
/// missing path is not an error.
pub fn force_remove(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if let Ok(metadata) = entry.metadata() {
            let mut permissions = metadata.permissions();
            if permissions.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                permissions.set_readonly(false);
                let _ = std::fs::set_permissions(entry.path(), permissions);
            }
        }
    }
    std::fs::remove_dir_all(path)
}

async fn force_remove_async(path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || force_remove(&path))
        .await
        .map_err(|e| HealError::InvalidWorkspace(format!("removal task failed: {e}")))?
        .map_err(HealError::from)
}

/// Creates, reuses and removes run workspaces.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceManager {
    config: WorkspaceConfig,
}

impl WorkspaceManager {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self { config }
    }

    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.config.base_dir.join(run_id.as_str())
    }

    pub fn workspace_path(&self, run_id: &RunId, repo_name: &str) -> PathBuf {
        self.run_dir(run_id).join(repo_name)
    }

    async fn existing_clone_of(&self, path: &Path, remote_url: &str) -> bool {
        if !path.join(".git").exists() {
            return false;
        }
        match run_git(path, &["remote", "get-url", "origin"], Duration::from_secs(10)).await {
            Ok(out) if out.success => scrub_url(out.stdout_trimmed()) == scrub_url(remote_url),
            _ => false,
        }
    }

    /// Reset a reopened clone to its last commit: uncommitted edits and
    /// untracked files left by an interrupted run are dropped.
    async fn discard_local_changes(&self, path: &Path) -> std::result::Result<(), String> {
        for args in [&["reset", "--hard", "--quiet"][..], &["clean", "-fdq"][..]] {
            match run_git(path, args, Duration::from_secs(30)).await {
                Ok(out) if out.success => {}
                Ok(out) => return Err(out.stderr.trim().to_string()),
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }

    /// Clone `remote_url` into the run's directory, or reopen the clone a
    /// previous attempt of the same run left there when `reuse_existing`
    /// is set.
    ///
    /// Credentials are used for the clone only; the stored `origin` URL is
    /// scrubbed afterwards.
    pub async fn materialize(
        &self,
        run_id: &RunId,
        remote_url: &str,
        credentials: Option<&GitCredentials>,
    ) -> Result<Workspace> {
        let name = repo_name(remote_url)?;
        let path = self.workspace_path(run_id, &name);
        let clean_url = scrub_url(remote_url.trim());

        if self.config.reuse_existing && self.existing_clone_of(&path, &clean_url).await {
            match self.discard_local_changes(&path).await {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "reusing existing clone");
                    return Ok(Workspace {
                        run_id: run_id.clone(),
                        repo_name: name,
                        path,
                        remote_url: clean_url,
                        reused: true,
                    });
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), reason = %reason, "existing clone unusable; recloning");
                }
            }
        }

        force_remove_async(path.clone()).await?;
        let parent = self.run_dir(run_id);
        tokio::fs::create_dir_all(&parent).await?;

        let clone_url = match credentials {
            Some(c) => authenticated_url(&clean_url, c),
            None => clean_url.clone(),
        };
        let redact = |text: &str| match credentials {
            Some(c) => c.redact(text),
            None => text.to_string(),
        };

        let depth = self.config.clone_depth.map(|d| d.to_string());
        let mut args = vec!["clone", "--no-tags"];
        if let Some(depth) = depth.as_deref() {
            args.extend(["--depth", depth]);
        }
        args.extend(["--", clone_url.as_str(), name.as_str()]);

        tracing::info!(url = %clean_url, path = %path.display(), "cloning repository");
        let timeout = Duration::from_secs(self.config.clone_timeout_secs);
        let failure = match run_git(&parent, &args, timeout).await {
            Ok(out) if out.success => None,
            Ok(out) => Some(redact(out.stderr.trim())),
            Err(e @ GitInvokeError::Timeout { .. }) => Some(e.to_string()),
            Err(e) => Some(redact(&e.to_string())),
        };
        if let Some(reason) = failure {
            if let Err(e) = force_remove_async(path.clone()).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove partial clone");
            }
            return Err(HealError::CloneFailed {
                url: clean_url,
                reason,
            });
        }

        if clone_url != clean_url {
            let scrubbed = run_git(
                &path,
                &["remote", "set-url", "origin", clean_url.as_str()],
                Duration::from_secs(10),
            )
            .await;
            if !matches!(scrubbed, Ok(ref out) if out.success) {
                // A token left in .git/config outlives the run; do not keep it.
                force_remove_async(path.clone()).await?;
                return Err(HealError::CloneFailed {
                    url: clean_url,
                    reason: "could not scrub credentials from origin".to_string(),
                });
            }
        }

        Ok(Workspace {
            run_id: run_id.clone(),
            repo_name: name,
            path,
            remote_url: clean_url,
            reused: false,
        })
    }

    /// Remove everything under the run's directory.
    pub async fn release(&self, run_id: &RunId) -> Result<()> {
        force_remove_async(self.run_dir(run_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_name_derivation() {
        assert_eq!(repo_name("https://github.com/acme/calc.git").unwrap(), "calc");
        assert_eq!(repo_name("https://github.com/acme/calc/").unwrap(), "calc");
        assert_eq!(repo_name("git@github.com:acme/calc.git").unwrap(), "calc");
        assert_eq!(repo_name("/srv/git/calc.git").unwrap(), "calc");
        assert!(repo_name("https://github.com/").is_err());
        assert!(repo_name("").is_err());
    }

    #[test]
    fn test_force_remove_clears_readonly() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("ws");
        std::fs::create_dir_all(target.join("objects")).unwrap();
        let file = target.join("objects/pack");
        std::fs::write(&file, "x").unwrap();
        let mut perms = std::fs::metadata(&file).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&file, perms).unwrap();

        force_remove(&target).unwrap();
        assert!(!target.exists());
        // Missing path is fine.
        force_remove(&target).unwrap();
    }

    #[test]
    fn test_workspace_path_is_run_scoped() {
        let manager = WorkspaceManager::new(WorkspaceConfig {
            base_dir: PathBuf::from("/srv/heal"),
            ..WorkspaceConfig::default()
        });
        let run = RunId::from("run-1");
        assert_eq!(
            manager.workspace_path(&run, "calc"),
            PathBuf::from("/srv/heal/run-1/calc")
        );
    }
}
