//! Git automation: fix branches, provenance-stamped commits, guarded pushes.
//!
//! Per run the layer moves through `Clean → Branched → Committed → Pushed`,
//! or lands in `Failed`. A commit whose push fails is withdrawn, returning
//! the layer to `Branched`. Expected failure modes (protected branch, nothing
//! to commit, rejected or unauthenticated push, network timeout) come back
//! as a [`GitOutcome`]; only an invalid workspace or an uncreatable branch
//! is an `Err`.
//!
//! # Modules
//!
//! - [`branch`]: branch-name sanitization and protected-branch policy
//! - [`command`]: `git` subprocess helper, credentials, URL handling

pub mod branch;
pub mod command;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use branch::{fix_branch_name, is_protected, sanitize_branch_component, PROTECTED_BRANCHES};
pub use command::{authenticated_url, run_git, scrub_url, GitCredentials, GitInvokeError, GitOutput};

use crate::domain::{HealError, Result};

/// Prefix carried by every commit message this layer records.
pub const PROVENANCE_PREFIX: &str = "[AI-AGENT] ";

/// `message` guaranteed to start with [`PROVENANCE_PREFIX`] exactly once.
pub fn with_provenance(message: &str) -> String {
    let summary = message.trim();
    let summary = summary
        .strip_prefix(PROVENANCE_PREFIX.trim_end())
        .map(str::trim_start)
        .unwrap_or(summary);
    let summary = if summary.is_empty() {
        "automated fix"
    } else {
        summary
    };
    format!("{PROVENANCE_PREFIX}{summary}")
}

/// Git-layer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub remote: String,
    pub author_name: String,
    pub author_email: String,
    /// Bound on fetch and push.
    pub network_timeout_secs: u64,
    /// Bound on local-only commands.
    pub local_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            author_name: "AI Agent".to_string(),
            author_email: "ai-agent@autoheal.invalid".to_string(),
            network_timeout_secs: 60,
            local_timeout_secs: 30,
        }
    }
}

/// Where a fix's git delivery ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GitState {
    Clean,
    Branched,
    Committed,
    Pushed,
    Failed,
}

/// Expected, non-fatal reasons a commit/push did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GitFailure {
    /// Refused before any git command ran.
    ProtectedBranch { branch: String },
    /// HEAD is not on the requested branch; nothing was staged.
    BranchMismatch { expected: String, actual: String },
    NothingToCommit,
    Stage { detail: String },
    Commit { detail: String },
    Remote { detail: String },
    Auth { detail: String },
    PushRejected { detail: String },
    Timeout { operation: String, secs: u64 },
}

impl fmt::Display for GitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitFailure::ProtectedBranch { branch } => {
                write!(f, "refusing to commit to protected branch '{branch}'")
            }
            GitFailure::BranchMismatch { expected, actual } => {
                write!(f, "HEAD is on '{actual}', expected '{expected}'")
            }
            GitFailure::NothingToCommit => write!(f, "nothing to commit"),
            GitFailure::Stage { detail } => write!(f, "staging failed: {detail}"),
            GitFailure::Commit { detail } => write!(f, "commit failed: {detail}"),
            GitFailure::Remote { detail } => write!(f, "remote setup failed: {detail}"),
            GitFailure::Auth { detail } => write!(f, "authentication failed: {detail}"),
            GitFailure::PushRejected { detail } => write!(f, "push rejected: {detail}"),
            GitFailure::Timeout { operation, secs } => {
                write!(f, "git {operation} timed out after {secs}s")
            }
        }
    }
}

/// Structured result of a commit/push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitOutcome {
    pub success: bool,
    pub branch: String,
    /// Set when the commit exists: always after a push, and after a failed
    /// push only if the commit could not be withdrawn.
    pub commit_id: Option<String>,
    pub reason: Option<GitFailure>,
    pub state: GitState,
}

impl GitOutcome {
    fn pushed(branch: &str, commit_id: String) -> Self {
        Self {
            success: true,
            branch: branch.to_string(),
            commit_id: Some(commit_id),
            reason: None,
            state: GitState::Pushed,
        }
    }

    fn failed(branch: &str, state: GitState, commit_id: Option<String>, reason: GitFailure) -> Self {
        Self {
            success: false,
            branch: branch.to_string(),
            commit_id,
            reason: Some(reason),
            state,
        }
    }

    /// The working tree had no changes; no commit was created.
    pub fn is_noop(&self) -> bool {
        matches!(self.reason, Some(GitFailure::NothingToCommit))
    }
}

/// Inputs to one commit-and-push.
#[derive(Debug, Clone, Copy)]
pub struct CommitRequest<'a> {
    pub workspace: &'a Path,
    pub branch: &'a str,
    /// Summary; the provenance prefix is added by the layer.
    pub message: &'a str,
    pub credentials: Option<&'a GitCredentials>,
    /// Push target; defaults to the configured remote's current URL.
    pub remote_url: Option<&'a str>,
}

/// Git operations the orchestrator depends on.
#[async_trait]
pub trait GitOps: Send + Sync {
    /// Create and check out the run's fix branch from HEAD. When HEAD is
    /// already on that branch it is kept as is.
    async fn prepare_branch(&self, workspace: &Path, team: &str, leader: &str) -> Result<String>;

    /// Stage everything, commit with provenance, reconcile, push.
    async fn commit_and_push(&self, request: CommitRequest<'_>) -> Result<GitOutcome>;
}

// ---------------------------------------------------------------------------
// CliGit
// ---------------------------------------------------------------------------

/// [`GitOps`] over the `git` executable.
#[derive(Debug, Clone, Default)]
pub struct CliGit {
    config: GitConfig,
}

fn redact(credentials: Option<&GitCredentials>, text: &str) -> String {
    match credentials {
        Some(c) => c.redact(text),
        None => text.to_string(),
    }
}

enum Step {
    Done(GitOutput),
    TimedOut(GitFailure),
}

impl CliGit {
    pub fn new(config: GitConfig) -> Self {
        Self { config }
    }

    fn local_timeout(&self) -> Duration {
        Duration::from_secs(self.config.local_timeout_secs)
    }

    fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.config.network_timeout_secs)
    }

    async fn step(&self, dir: &Path, args: &[&str], timeout: Duration) -> Result<Step> {
        match run_git(dir, args, timeout).await {
            Ok(output) => Ok(Step::Done(output)),
            Err(GitInvokeError::Timeout { operation, secs }) => {
                Ok(Step::TimedOut(GitFailure::Timeout { operation, secs }))
            }
            Err(GitInvokeError::Spawn(e)) => Err(HealError::Git(format!("cannot run git: {e}"))),
        }
    }

    async fn ensure_work_tree(&self, workspace: &Path) -> Result<()> {
        if !workspace.is_dir() {
            return Err(HealError::InvalidWorkspace(format!(
                "{} does not exist",
                workspace.display()
            )));
        }
        let inside = run_git(
            workspace,
            &["rev-parse", "--is-inside-work-tree"],
            self.local_timeout(),
        )
        .await
        .map(|o| o.success && o.stdout_trimmed() == "true")
        .unwrap_or(false);
        if !inside {
            return Err(HealError::InvalidWorkspace(format!(
                "{} is not a git work tree",
                workspace.display()
            )));
        }
        Ok(())
    }

    async fn current_branch(&self, workspace: &Path) -> Option<String> {
        let out = run_git(
            workspace,
            &["rev-parse", "--abbrev-ref", "HEAD"],
            self.local_timeout(),
        )
        .await
        .ok()?;
        out.success.then(|| out.stdout_trimmed().to_string())
    }

    async fn remote_url(&self, workspace: &Path) -> Option<String> {
        let out = run_git(
            workspace,
            &["remote", "get-url", self.config.remote.as_str()],
            self.local_timeout(),
        )
        .await
        .ok()?;
        out.success.then(|| out.stdout_trimmed().to_string())
    }

    /// Point the remote at `url`; returns the URL to restore (`None` when
    /// the remote did not exist and must be removed again).
    async fn point_remote(&self, workspace: &Path, url: &str) -> Result<Option<String>> {
        let original = self.remote_url(workspace).await;
        let args: Vec<&str> = match original {
            Some(_) => vec!["remote", "set-url", self.config.remote.as_str(), url],
            None => vec!["remote", "add", self.config.remote.as_str(), url],
        };
        match self.step(workspace, &args, self.local_timeout()).await? {
            Step::Done(out) if out.success => Ok(original),
            Step::Done(out) => Err(HealError::Git(format!(
                "cannot configure remote: {}",
                out.stderr.trim()
            ))),
            Step::TimedOut(reason) => Err(HealError::Git(reason.to_string())),
        }
    }

    async fn restore_remote(&self, workspace: &Path, original: Option<&str>) {
        let args: Vec<&str> = match original {
            Some(url) => vec!["remote", "set-url", self.config.remote.as_str(), url],
            None => vec!["remote", "remove", self.config.remote.as_str()],
        };
        match run_git(workspace, &args, self.local_timeout()).await {
            Ok(out) if out.success => {}
            Ok(out) => tracing::error!(stderr = %out.stderr.trim(), "failed to restore remote URL"),
            Err(e) => tracing::error!(error = %e, "failed to restore remote URL"),
        }
    }

    /// Fast-forward to the remote branch when it already exists, before the
    /// fix is committed. Failure is logged and the push goes ahead.
    async fn reconcile(&self, workspace: &Path, branch: &str, credentials: Option<&GitCredentials>) {
        let refspec = format!("refs/heads/{branch}:refs/remotes/{}/{branch}", self.config.remote);
        let fetched = run_git(
            workspace,
            &["fetch", self.config.remote.as_str(), refspec.as_str()],
            self.network_timeout(),
        )
        .await;
        match fetched {
            Ok(out) if out.success => {}
            Ok(out) => {
                tracing::debug!(branch = %branch, stderr = %redact(credentials, out.stderr.trim()), "remote branch not fetched");
                return;
            }
            Err(e) => {
                tracing::warn!(branch = %branch, error = %e, "fetch before push failed");
                return;
            }
        }

        let tracking = format!("refs/remotes/{}/{branch}", self.config.remote);
        match run_git(
            workspace,
            &["merge", "--ff-only", "--no-edit", tracking.as_str()],
            self.local_timeout(),
        )
        .await
        {
            Ok(out) if out.success => {}
            Ok(out) => tracing::warn!(
                branch = %branch,
                stderr = %out.stderr.trim(),
                "fast-forward from remote failed; pushing anyway"
            ),
            Err(e) => tracing::warn!(branch = %branch, error = %e, "fast-forward from remote failed; pushing anyway"),
        }
    }

    async fn push(
        &self,
        workspace: &Path,
        branch: &str,
        credentials: Option<&GitCredentials>,
    ) -> Result<Option<GitFailure>> {
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let out = match self
            .step(workspace, &["push", self.config.remote.as_str(), refspec.as_str()], self.network_timeout())
            .await?
        {
            Step::Done(out) => out,
            Step::TimedOut(reason) => return Ok(Some(reason)),
        };
        if out.success {
            return Ok(None);
        }
        let detail = redact(credentials, out.stderr.trim());
        let lowered = detail.to_lowercase();
        let failure = if lowered.contains("authentication failed")
            || lowered.contains("could not read username")
            || lowered.contains("permission denied")
            || lowered.contains("403")
        {
            GitFailure::Auth { detail }
        } else {
            GitFailure::PushRejected { detail }
        };
        Ok(Some(failure))
    }

    async fn has_changes(&self, workspace: &Path) -> Result<bool> {
        let status = run_git(workspace, &["status", "--porcelain"], self.local_timeout())
            .await
            .map_err(|e| HealError::Git(e.to_string()))?;
        if !status.success {
            return Err(HealError::Git(format!(
                "cannot read working tree status: {}",
                status.stderr.trim()
            )));
        }
        Ok(!status.stdout_trimmed().is_empty())
    }

    async fn head(&self, workspace: &Path) -> Option<String> {
        let out = run_git(workspace, &["rev-parse", "HEAD"], self.local_timeout())
            .await
            .ok()?;
        out.success.then(|| out.stdout_trimmed().to_string())
    }

    /// Drop an undelivered commit and its changes by resetting to `base`.
    async fn withdraw(&self, workspace: &Path, base: &str) -> bool {
        match run_git(workspace, &["reset", "--hard", "--quiet", base], self.local_timeout()).await {
            Ok(out) if out.success => {
                tracing::info!(base = %base, "undelivered commit withdrawn");
                true
            }
            Ok(out) => {
                tracing::error!(stderr = %out.stderr.trim(), "failed to withdraw undelivered commit");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to withdraw undelivered commit");
                false
            }
        }
    }

    /// Reconcile with the remote branch, commit, push. A commit whose push
    /// fails is withdrawn so it cannot ride along with a later fix.
    async fn deliver(
        &self,
        workspace: &Path,
        branch: &str,
        message: &str,
        credentials: Option<&GitCredentials>,
    ) -> Result<GitOutcome> {
        self.reconcile(workspace, branch, credentials).await;
        let base = self.head(workspace).await;

        let commit_id = match self.commit(workspace, message).await? {
            Ok(sha) => sha,
            Err((state, reason)) => return Ok(GitOutcome::failed(branch, state, None, reason)),
        };

        let reason = match self.push(workspace, branch, credentials).await {
            Ok(None) => return Ok(GitOutcome::pushed(branch, commit_id)),
            Ok(Some(reason)) => reason,
            Err(e) => {
                if let Some(base) = &base {
                    self.withdraw(workspace, base).await;
                }
                return Err(e);
            }
        };
        match base {
            Some(base) if self.withdraw(workspace, &base).await => {
                Ok(GitOutcome::failed(branch, GitState::Branched, None, reason))
            }
            _ => Ok(GitOutcome::failed(
                branch,
                GitState::Committed,
                Some(commit_id),
                reason,
            )),
        }
    }

    /// Stage, commit and return the new HEAD, or the reason there is none.
    async fn commit(
        &self,
        workspace: &Path,
        message: &str,
    ) -> Result<std::result::Result<String, (GitState, GitFailure)>> {
        match self.step(workspace, &["add", "-A"], self.local_timeout()).await? {
            Step::Done(out) if out.success => {}
            Step::Done(out) => {
                return Ok(Err((
                    GitState::Failed,
                    GitFailure::Stage {
                        detail: out.stderr.trim().to_string(),
                    },
                )))
            }
            Step::TimedOut(reason) => return Ok(Err((GitState::Failed, reason))),
        }

        let staged = run_git(
            workspace,
            &["diff", "--cached", "--quiet"],
            self.local_timeout(),
        )
        .await
        .map_err(|e| HealError::Git(e.to_string()))?;
        if staged.success {
            return Ok(Err((GitState::Branched, GitFailure::NothingToCommit)));
        }

        let name = format!("user.name={}", self.config.author_name);
        let email = format!("user.email={}", self.config.author_email);
        let args = [
            "-c",
            name.as_str(),
            "-c",
            email.as_str(),
            "commit",
            "--no-verify",
            "-m",
            message,
        ];
        match self.step(workspace, &args, self.local_timeout()).await? {
            Step::Done(out) if out.success => {}
            Step::Done(out) => {
                return Ok(Err((
                    GitState::Failed,
                    GitFailure::Commit {
                        detail: format!("{}{}", out.stdout.trim(), out.stderr.trim()),
                    },
                )))
            }
            Step::TimedOut(reason) => return Ok(Err((GitState::Failed, reason))),
        }

        let head = run_git(workspace, &["rev-parse", "HEAD"], self.local_timeout())
            .await
            .map_err(|e| HealError::Git(e.to_string()))?;
        if !head.success {
            return Err(HealError::Git(format!(
                "cannot resolve HEAD after commit: {}",
                head.stderr.trim()
            )));
        }
        Ok(Ok(head.stdout_trimmed().to_string()))
    }
}

#[async_trait]
impl GitOps for CliGit {
    async fn prepare_branch(&self, workspace: &Path, team: &str, leader: &str) -> Result<String> {
        let branch = fix_branch_name(team, leader)?;
        self.ensure_work_tree(workspace).await?;

        // A resumed run reopens a clone already on its fix branch.
        if self.current_branch(workspace).await.as_deref() == Some(branch.as_str()) {
            tracing::info!(branch = %branch, "continuing on existing fix branch");
            return Ok(branch);
        }

        let out = run_git(workspace, &["checkout", "-b", branch.as_str()], self.local_timeout())
            .await
            .map_err(|e| HealError::BranchCreation {
                branch: branch.clone(),
                reason: e.to_string(),
            })?;
        if !out.success {
            return Err(HealError::BranchCreation {
                branch,
                reason: out.stderr.trim().to_string(),
            });
        }
        tracing::info!(branch = %branch, "fix branch created");
        Ok(branch)
    }

    async fn commit_and_push(&self, request: CommitRequest<'_>) -> Result<GitOutcome> {
        let branch = request.branch;
        if is_protected(branch) {
            return Ok(GitOutcome::failed(
                branch,
                GitState::Failed,
                None,
                GitFailure::ProtectedBranch {
                    branch: branch.to_string(),
                },
            ));
        }
        self.ensure_work_tree(request.workspace).await?;

        let actual = self.current_branch(request.workspace).await.unwrap_or_default();
        if actual != branch {
            return Ok(GitOutcome::failed(
                branch,
                GitState::Failed,
                None,
                GitFailure::BranchMismatch {
                    expected: branch.to_string(),
                    actual,
                },
            ));
        }

        if !self.has_changes(request.workspace).await? {
            return Ok(GitOutcome::failed(
                branch,
                GitState::Branched,
                None,
                GitFailure::NothingToCommit,
            ));
        }

        let credentials = request.credentials;
        // Temporarily repoint the remote when a URL or credentials were given.
        let current = self.remote_url(request.workspace).await;
        let target = request.remote_url.map(str::to_string).or_else(|| current.clone());
        let Some(target) = target else {
            return Ok(GitOutcome::failed(
                branch,
                GitState::Branched,
                None,
                GitFailure::Remote {
                    detail: format!("remote '{}' is not configured", self.config.remote),
                },
            ));
        };
        let effective = match credentials {
            Some(c) => authenticated_url(&target, c),
            None => target,
        };
        let restore = if current.as_deref() != Some(effective.as_str()) {
            match self.point_remote(request.workspace, &effective).await {
                Ok(original) => Some(original),
                Err(e) => {
                    return Ok(GitOutcome::failed(
                        branch,
                        GitState::Branched,
                        None,
                        GitFailure::Remote {
                            detail: redact(credentials, &e.to_string()),
                        },
                    ))
                }
            }
        } else {
            None
        };

        let message = with_provenance(request.message);
        let outcome = self
            .deliver(request.workspace, branch, &message, credentials)
            .await;

        if let Some(original) = restore {
            self.restore_remote(request.workspace, original.as_deref()).await;
        }
        outcome
    }
}
