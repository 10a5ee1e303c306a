//! In-memory fakes for the orchestrator's collaborators (testing only)
//!
//! Provides `ScriptedScanner`, `ScriptedRepairer`, `RecordingGit`,
//! `StaticExecutor` and `FixedClock`, which satisfy the trait contracts
//! without containers, network access or a `git` binary.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Defect, ExecutionMode, ExecutionResult, Language, Result, ScanReport, TestVerdict,
};
use crate::git::{
    fix_branch_name, is_protected, with_provenance, CommitRequest, GitFailure, GitOps, GitOutcome,
    GitState,
};
use crate::orchestrator::Clock;
use crate::repair::{RepairError, RepairGenerator};
use crate::sandbox::TestExecutor;
use crate::scanner::Scanner;

// ---------------------------------------------------------------------------
// ScriptedScanner
// ---------------------------------------------------------------------------

/// Returns queued reports in order, then repeats the last one.
#[derive(Debug, Default)]
pub struct ScriptedScanner {
    reports: Mutex<VecDeque<ScanReport>>,
    last: Mutex<Option<ScanReport>>,
    calls: AtomicUsize,
}

impl ScriptedScanner {
    pub fn new(reports: impl IntoIterator<Item = ScanReport>) -> Self {
        Self {
            reports: Mutex::new(reports.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Same defects on every scan.
    pub fn repeating(defects: Vec<Defect>) -> Self {
        Self::new([ScanReport::new(".", defects, Vec::new())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scanner for ScriptedScanner {
    async fn scan(&self, workspace: &Path) -> Result<ScanReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.reports.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        let report = match next {
            Some(report) => report,
            None => last
                .clone()
                .unwrap_or_else(|| ScanReport::new(workspace, Vec::new(), Vec::new())),
        };
        *last = Some(report.clone());
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// ScriptedRepairer
// ---------------------------------------------------------------------------

enum RepairScript {
    /// Append a marker line to the original content.
    AppendMarker,
    Fixed(String),
    Fail(String),
}

/// Repairer with per-file behavior. Files without a script get the original
/// content plus a `# healed` marker line.
pub struct ScriptedRepairer {
    scripts: Mutex<HashMap<String, RepairScript>>,
    default_failure: Option<String>,
    calls: Mutex<Vec<Defect>>,
}

impl Default for ScriptedRepairer {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedRepairer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every repair fails with `reason` unless a file has its own script.
    pub fn always_failing(reason: &str) -> Self {
        Self {
            default_failure: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn with_content(self, file: &str, content: &str) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(file.to_string(), RepairScript::Fixed(content.to_string()));
        self
    }

    pub fn with_failure(self, file: &str, reason: &str) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(file.to_string(), RepairScript::Fail(reason.to_string()));
        self
    }

    /// Defects passed to `repair`, in call order.
    pub fn calls(&self) -> Vec<Defect> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepairGenerator for ScriptedRepairer {
    async fn repair(
        &self,
        defect: &Defect,
        file_content: &str,
    ) -> std::result::Result<String, RepairError> {
        self.calls.lock().unwrap().push(defect.clone());
        let scripts = self.scripts.lock().unwrap();
        let script = match scripts.get(&defect.file) {
            Some(script) => script,
            None => match &self.default_failure {
                Some(reason) => {
                    return Err(RepairError::Status {
                        status: 503,
                        body: reason.clone(),
                    })
                }
                None => &RepairScript::AppendMarker,
            },
        };
        match script {
            RepairScript::AppendMarker => Ok(format!("{file_content}\n# healed\n")),
            RepairScript::Fixed(content) => Ok(content.clone()),
            RepairScript::Fail(reason) => Err(RepairError::Status {
                status: 500,
                body: reason.clone(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingGit
// ---------------------------------------------------------------------------

/// One commit seen by [`RecordingGit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub workspace: PathBuf,
    pub branch: String,
    /// Message with the provenance prefix applied.
    pub message: String,
    pub commit_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushBehavior {
    Succeed,
    /// Rejected; the commit is withdrawn as `CliGit` does.
    RejectAndWithdraw,
    /// Rejected, and the commit could not be withdrawn.
    RejectAndKeep,
}

/// [`GitOps`] that records branches and commits instead of running git.
#[derive(Debug)]
pub struct RecordingGit {
    push: PushBehavior,
    branches: Mutex<Vec<String>>,
    commits: Mutex<Vec<RecordedCommit>>,
}

impl Default for RecordingGit {
    fn default() -> Self {
        Self {
            push: PushBehavior::Succeed,
            branches: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every push is rejected and its commit withdrawn.
    pub fn rejecting_pushes() -> Self {
        Self {
            push: PushBehavior::RejectAndWithdraw,
            ..Self::default()
        }
    }

    /// Every push is rejected and its commit stays in the local history.
    pub fn stranding_commits() -> Self {
        Self {
            push: PushBehavior::RejectAndKeep,
            ..Self::default()
        }
    }

    pub fn branches(&self) -> Vec<String> {
        self.branches.lock().unwrap().clone()
    }

    /// Commits still present in the local history.
    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitOps for RecordingGit {
    async fn prepare_branch(&self, _workspace: &Path, team: &str, leader: &str) -> Result<String> {
        let branch = fix_branch_name(team, leader)?;
        self.branches.lock().unwrap().push(branch.clone());
        Ok(branch)
    }

    async fn commit_and_push(&self, request: CommitRequest<'_>) -> Result<GitOutcome> {
        let branch = request.branch.to_string();
        if is_protected(request.branch) {
            return Ok(GitOutcome {
                success: false,
                branch: branch.clone(),
                commit_id: None,
                reason: Some(GitFailure::ProtectedBranch { branch }),
                state: GitState::Clean,
            });
        }

        let rejected = || {
            Some(GitFailure::PushRejected {
                detail: "remote rejected (fake)".to_string(),
            })
        };
        if self.push == PushBehavior::RejectAndWithdraw {
            return Ok(GitOutcome {
                success: false,
                branch,
                commit_id: None,
                reason: rejected(),
                state: GitState::Branched,
            });
        }

        let mut commits = self.commits.lock().unwrap();
        let commit_id = format!("{:040x}", commits.len() + 1);
        commits.push(RecordedCommit {
            workspace: request.workspace.to_path_buf(),
            branch: branch.clone(),
            message: with_provenance(request.message),
            commit_id: commit_id.clone(),
        });

        let outcome = match self.push {
            PushBehavior::Succeed => GitOutcome {
                success: true,
                branch,
                commit_id: Some(commit_id),
                reason: None,
                state: GitState::Pushed,
            },
            _ => GitOutcome {
                success: false,
                branch,
                commit_id: Some(commit_id),
                reason: rejected(),
                state: GitState::Committed,
            },
        };
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// StaticExecutor
// ---------------------------------------------------------------------------

/// [`TestExecutor`] returning one fixed verdict for every language.
#[derive(Debug)]
pub struct StaticExecutor {
    verdict: TestVerdict,
    mode: ExecutionMode,
    runs: Mutex<Vec<Language>>,
}

impl StaticExecutor {
    pub fn new(verdict: TestVerdict) -> Self {
        Self {
            verdict,
            mode: ExecutionMode::Sandboxed,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn passing() -> Self {
        Self::new(TestVerdict::Passed)
    }

    pub fn in_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Languages run so far, in call order.
    pub fn runs(&self) -> Vec<Language> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl TestExecutor for StaticExecutor {
    async fn run(&self, _workspace: &Path, language: Language) -> ExecutionResult {
        self.runs.lock().unwrap().push(language);
        let passed = self.verdict == TestVerdict::Passed;
        ExecutionResult {
            language,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: match &self.verdict {
                TestVerdict::Passed => 0,
                TestVerdict::TimedOut { .. } => -1,
                _ => 1,
            },
            succeeded: passed,
            structured_report: None,
            mode: self.mode,
            verdict: self.verdict.clone(),
            duration_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// FixedClock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
