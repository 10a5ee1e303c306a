//! Healing orchestrator: scan → dedup → repair → commit/push → rescan.
//!
//! The loop is strictly sequential within a run. It always terminates after
//! at most `max_iterations` rounds, and every exit (converged, exhausted,
//! cancelled, fatal) ends with a scan of the final tree. A run is only
//! marked PASSED when that scan reports zero defects and every commit it
//! made was pushed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use autoheal_state::{FixRecord, RunId, RunPhase, RunStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    commit_summary, Defect, Degradation, FixAttempt, FixStage, FixStatus, Result, RunOutcome,
    RunState, RunStatus, ScanReport,
};
use crate::git::{with_provenance, CommitRequest, GitCredentials, GitOps};
use crate::obs;
use crate::repair::RepairGenerator;
use crate::scanner::Scanner;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cooperative cancellation, checked before each iteration's scan.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub max_iterations: u32,
    /// Stop attempting files whose fix failed earlier in the run.
    pub quarantine_failed_files: bool,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            quarantine_failed_files: true,
        }
    }
}

/// One healing run's inputs.
#[derive(Debug, Clone)]
pub struct HealRequest {
    pub run_id: RunId,
    pub workspace: PathBuf,
    pub team: String,
    pub leader: String,
    pub credentials: Option<GitCredentials>,
    /// Push target when it differs from the clone's `origin`.
    pub remote_url: Option<String>,
}

/// The defects to act on this round: the first actionable defect of each
/// file, in scan order, skipping `excluded` files.
pub fn unique_by_file(defects: &[Defect], excluded: &HashSet<String>) -> Vec<Defect> {
    let mut seen = HashSet::new();
    defects
        .iter()
        .filter(|d| d.is_actionable() && !excluded.contains(&d.file))
        .filter(|d| seen.insert(d.file.clone()))
        .cloned()
        .collect()
}

pub struct HealingOrchestrator {
    scanner: Arc<dyn Scanner>,
    repairer: Arc<dyn RepairGenerator>,
    git: Arc<dyn GitOps>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn RunStore>>,
    config: HealingConfig,
}

/// Loop exit before concluding.
enum Stop {
    Converged(ScanReport),
    Exhausted,
    Cancelled,
    Fatal(String),
}

impl HealingOrchestrator {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        repairer: Arc<dyn RepairGenerator>,
        git: Arc<dyn GitOps>,
        config: HealingConfig,
    ) -> Self {
        Self {
            scanner,
            repairer,
            git,
            clock: Arc::new(SystemClock),
            store: None,
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mirror phase changes and fixes into `store`. Store failures are
    /// logged, never fatal.
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    async fn set_phase(&self, run_id: &RunId, phase: RunPhase, iteration: u32) {
        if let Some(store) = &self.store {
            if let Err(e) = store.update_phase(run_id, phase, iteration).await {
                obs::emit_bookkeeping_error(run_id.as_str(), &e);
            }
        }
    }

    async fn bookkeep_fix(&self, run_id: &RunId, attempt: &FixAttempt) {
        let Some(store) = &self.store else {
            return;
        };
        let record = FixRecord {
            iteration: attempt.iteration,
            file: attempt.defect.file.clone(),
            category: attempt.defect.category.to_string(),
            line: attempt.defect.line,
            commit_message: attempt.commit_message.clone(),
            applied: attempt.applied(),
            commit_sha: attempt.commit_sha().map(str::to_string),
            failure_reason: attempt.failure_reason().map(str::to_string),
            recorded_at: self.clock.now(),
        };
        if let Err(e) = store.append_fix(run_id, record).await {
            obs::emit_bookkeeping_error(run_id.as_str(), &e);
        }
    }

    async fn scan(&self, run_id: &RunId, workspace: &Path) -> Result<ScanReport> {
        obs::emit_scan_started(run_id.as_str(), &workspace.display().to_string());
        let started = std::time::Instant::now();
        let report = self.scanner.scan(workspace).await?;
        obs::emit_scan_finished(
            run_id.as_str(),
            report.total_defect_count(),
            report.degradations().len(),
            started.elapsed().as_millis() as u64,
        );
        Ok(report)
    }

    /// Scan the tree as it stands at the end of the run.
    async fn verify(
        &self,
        request: &HealRequest,
        state: &RunState,
        degradations: &mut Vec<Degradation>,
    ) -> Result<ScanReport> {
        self.set_phase(&request.run_id, RunPhase::Verifying, state.iteration_count())
            .await;
        let report = self.scan(&request.run_id, &request.workspace).await?;
        merge_degradations(degradations, report.degradations());
        Ok(report)
    }

    /// Run the loop to a terminal status. Never returns an error: structural
    /// failures conclude the run as FAILED with the reason recorded.
    pub async fn run(&self, request: &HealRequest, cancel: &CancellationFlag) -> RunOutcome {
        let run_id = &request.run_id;
        let started_at = self.clock.now();
        let mut state = RunState::new(&request.workspace);
        let mut initial_scan: Option<ScanReport> = None;
        let mut degradations: Vec<Degradation> = Vec::new();
        let mut quarantined: HashSet<String> = HashSet::new();
        // Files whose fix was committed but neither pushed nor withdrawn.
        let mut undelivered: Vec<String> = Vec::new();

        obs::emit_run_started(
            run_id.as_str(),
            &request.workspace.display().to_string(),
            self.config.max_iterations,
        );

        let mut stop = Stop::Exhausted;
        'rounds: for _ in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                obs::emit_run_cancelled(run_id.as_str(), state.iteration_count());
                stop = Stop::Cancelled;
                break;
            }

            let iteration = state.begin_iteration();
            obs::emit_iteration_started(run_id.as_str(), iteration);
            self.set_phase(run_id, RunPhase::Scanning, iteration).await;

            let report = match self.scan(run_id, &request.workspace).await {
                Ok(report) => report,
                Err(e) => {
                    stop = Stop::Fatal(format!("scan failed: {e}"));
                    break;
                }
            };
            merge_degradations(&mut degradations, report.degradations());
            if initial_scan.is_none() {
                initial_scan = Some(report.clone());
            }
            if report.is_clean() {
                stop = Stop::Converged(report);
                break;
            }

            let excluded = if self.config.quarantine_failed_files {
                quarantined.clone()
            } else {
                HashSet::new()
            };
            let targets = unique_by_file(report.defects(), &excluded);
            if targets.is_empty() {
                tracing::info!(
                    iteration,
                    defects = report.total_defect_count(),
                    "no repairable defects this round"
                );
                continue;
            }

            self.set_phase(run_id, RunPhase::Repairing, iteration).await;
            for defect in targets {
                let fixed = self
                    .fix(request, &mut state, &mut undelivered, iteration, defect)
                    .await;
                let attempt = match fixed {
                    Ok(attempt) => attempt,
                    Err(e) => {
                        stop = Stop::Fatal(e.to_string());
                        break 'rounds;
                    }
                };
                if !attempt.applied() {
                    quarantined.insert(attempt.defect.file.clone());
                }
                self.bookkeep_fix(run_id, &attempt).await;
                state.record(attempt);
            }
        }

        let (status, reason, final_scan) = match stop {
            Stop::Converged(report) => (RunStatus::Passed, None, Some(report)),
            Stop::Cancelled => {
                let verified = self.verify(request, &state, &mut degradations).await;
                (
                    RunStatus::Failed,
                    Some(format!(
                        "cancelled after {} iteration(s)",
                        state.iteration_count()
                    )),
                    verified.ok(),
                )
            }
            Stop::Fatal(reason) => {
                let verified = self.verify(request, &state, &mut degradations).await;
                (RunStatus::Failed, Some(reason), verified.ok())
            }
            Stop::Exhausted => match self.verify(request, &state, &mut degradations).await {
                Ok(report) if report.is_clean() => (RunStatus::Passed, None, Some(report)),
                Ok(report) => (
                    RunStatus::Failed,
                    Some(format!(
                        "{} defect(s) remain after {} iteration(s)",
                        report.total_defect_count(),
                        state.iteration_count()
                    )),
                    Some(report),
                ),
                Err(e) => (
                    RunStatus::Failed,
                    Some(format!("final scan failed: {e}")),
                    None,
                ),
            },
        };
        let (status, reason) = if status == RunStatus::Passed && !undelivered.is_empty() {
            (
                RunStatus::Failed,
                Some(format!(
                    "fixes committed but not pushed: {}",
                    undelivered.join(", ")
                )),
            )
        } else {
            (status, reason)
        };

        if let Err(e) = state.conclude(status, reason) {
            tracing::error!(run_id = %run_id, error = %e, "run concluded twice");
        }
        let finished_at = self.clock.now();
        obs::emit_run_finished(
            run_id.as_str(),
            state.status(),
            state.iteration_count(),
            state.fixes_applied(),
            (finished_at - started_at).num_milliseconds().max(0) as u64,
        );

        RunOutcome {
            run_id: run_id.to_string(),
            state,
            initial_scan,
            final_scan,
            degradations,
            started_at,
            finished_at,
        }
    }

    /// Repair one defect and deliver it. `Err` only for structural failures
    /// (branch creation, invalid workspace) that end the run.
    async fn fix(
        &self,
        request: &HealRequest,
        state: &mut RunState,
        undelivered: &mut Vec<String>,
        iteration: u32,
        defect: Defect,
    ) -> Result<FixAttempt> {
        let run_id = request.run_id.as_str();
        let commit_message = with_provenance(&commit_summary(&defect));
        let failed = |defect: Defect, proposed: Option<String>, stage: FixStage, reason: String| {
            FixAttempt {
                iteration,
                defect,
                proposed_content: proposed,
                commit_message: commit_message.clone(),
                status: FixStatus::Failed { stage, reason },
            }
        };

        let path = match confined_path(&request.workspace, &defect.file).await {
            Ok(path) => path,
            Err(reason) => return Ok(failed(defect, None, FixStage::Read, reason)),
        };
        let original = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => return Ok(failed(defect, None, FixStage::Read, e.to_string())),
        };

        let proposed = match self.repairer.repair(&defect, &original).await {
            Ok(patch) => patch,
            Err(e) => {
                obs::emit_repair_attempted(run_id, &defect.file, defect.category, defect.line, false);
                return Ok(failed(defect, None, FixStage::Repair, e.to_string()));
            }
        };
        obs::emit_repair_attempted(run_id, &defect.file, defect.category, defect.line, true);
        if proposed.trim_end() == original.trim_end() {
            return Ok(failed(
                defect,
                Some(proposed),
                FixStage::Repair,
                "repair produced no change".to_string(),
            ));
        }

        let branch = match state.branch_name() {
            Some(branch) => branch.to_string(),
            None => {
                let branch = self
                    .git
                    .prepare_branch(&request.workspace, &request.team, &request.leader)
                    .await?;
                state.assign_branch(branch.clone())?;
                branch
            }
        };

        let mut content = proposed.clone();
        if original.ends_with('\n') && !content.ends_with('\n') {
            content.push('\n');
        }
        if let Err(e) = tokio::fs::write(&path, &content).await {
            return Ok(failed(defect, Some(proposed), FixStage::Write, e.to_string()));
        }

        let outcome = self
            .git
            .commit_and_push(CommitRequest {
                workspace: &request.workspace,
                branch: &branch,
                message: &commit_summary(&defect),
                credentials: request.credentials.as_ref(),
                remote_url: request.remote_url.as_deref(),
            })
            .await?;
        obs::emit_push_result(
            run_id,
            &branch,
            outcome.success,
            outcome.commit_id.as_deref(),
            outcome.reason.as_ref().map(|r| r as &dyn std::fmt::Display),
        );

        match (outcome.success, outcome.commit_id) {
            (true, Some(commit_sha)) => Ok(FixAttempt {
                iteration,
                defect,
                proposed_content: Some(proposed),
                commit_message,
                status: FixStatus::Applied { commit_sha },
            }),
            (_, commit_id) => {
                // Edits without a commit would ride along with the next fix.
                match commit_id {
                    None => {
                        if let Err(e) = tokio::fs::write(&path, &original).await {
                            tracing::warn!(file = %defect.file, error = %e, "failed to restore file after git failure");
                        }
                    }
                    Some(sha) => {
                        tracing::error!(file = %defect.file, commit = %sha, "fix committed locally but not pushed");
                        undelivered.push(defect.file.clone());
                    }
                }
                let reason = outcome
                    .reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "push reported success without a commit".to_string());
                Ok(failed(defect, Some(proposed), FixStage::Git, reason))
            }
        }
    }
}

/// `file` resolved inside `workspace`. Absolute paths, `..` components and
/// symlinks leading out of the workspace are refused.
async fn confined_path(workspace: &Path, file: &str) -> std::result::Result<PathBuf, String> {
    if !Defect::is_workspace_relative(file) {
        return Err(format!("refusing to touch '{file}': not inside the workspace"));
    }
    let path = workspace.join(file);
    let root = tokio::fs::canonicalize(workspace)
        .await
        .map_err(|e| format!("cannot resolve workspace: {e}"))?;
    let resolved = tokio::fs::canonicalize(&path)
        .await
        .map_err(|e| e.to_string())?;
    if !resolved.starts_with(&root) {
        return Err(format!(
            "refusing to touch '{file}': resolves outside the workspace"
        ));
    }
    Ok(path)
}

fn merge_degradations(into: &mut Vec<Degradation>, from: &[Degradation]) {
    for d in from {
        if !into.contains(d) {
            into.push(d.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DefectCategory;

    fn defect(file: &str, line: u32, category: DefectCategory) -> Defect {
        Defect::new(file, line, category, "d", "h")
    }

    #[test]
    fn test_unique_by_file_keeps_first_per_file() {
        let defects = vec![
            defect("a.py", 3, DefectCategory::Import),
            defect("b.py", 1, DefectCategory::Syntax),
            defect("a.py", 9, DefectCategory::Linting),
            defect("unknown", 0, DefectCategory::Logic),
            defect("c.py", 0, DefectCategory::Unreadable),
        ];
        let unique = unique_by_file(&defects, &HashSet::new());
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].file, "a.py");
        assert_eq!(unique[0].line, 3);
        assert_eq!(unique[1].file, "b.py");
    }

    #[test]
    fn test_unique_by_file_respects_exclusions() {
        let defects = vec![
            defect("a.py", 3, DefectCategory::Import),
            defect("b.py", 1, DefectCategory::Syntax),
        ];
        let excluded: HashSet<String> = ["a.py".to_string()].into_iter().collect();
        let unique = unique_by_file(&defects, &excluded);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].file, "b.py");
    }

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
