//! End-to-end healing pipeline for one repository:
//! clone → heal → report → bookkeeping → cleanup.

use std::path::PathBuf;
use std::sync::Arc;

use autoheal_state::{RecordStatus, RunId, RunPhase, RunStore, RunSummary};

use crate::config::HealConfig;
use crate::domain::{HealError, Result, RunOutcome, RunStatus};
use crate::git::{CliGit, GitCredentials, GitOps};
use crate::obs;
use crate::orchestrator::{CancellationFlag, Clock, HealRequest, HealingOrchestrator, SystemClock};
use crate::repair::{ChatCompletionRepairer, RepairGenerator};
use crate::report::{write_run_report, ReportContext, RunReport};
use crate::sandbox::SandboxedExecutor;
use crate::scanner::{RepositoryScanner, Scanner};
use crate::workspace::WorkspaceManager;

/// One healing request against a remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealJob {
    pub run_id: RunId,
    pub repository_url: String,
    pub team: String,
    pub leader: String,
}

/// Everything a finished pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub outcome: RunOutcome,
    pub report: RunReport,
    pub report_path: PathBuf,
}

fn record_status(status: RunStatus) -> RecordStatus {
    match status {
        RunStatus::Passed => RecordStatus::Passed,
        RunStatus::InProgress | RunStatus::Failed => RecordStatus::Failed,
    }
}

pub struct HealingPipeline {
    config: HealConfig,
    workspaces: WorkspaceManager,
    scanner: Arc<dyn Scanner>,
    repairer: Arc<dyn RepairGenerator>,
    git: Arc<dyn GitOps>,
    store: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
}

impl HealingPipeline {
    pub fn new(
        config: HealConfig,
        scanner: Arc<dyn Scanner>,
        repairer: Arc<dyn RepairGenerator>,
        git: Arc<dyn GitOps>,
        store: Arc<dyn RunStore>,
    ) -> Self {
        let workspaces = WorkspaceManager::new(config.workspace.clone());
        Self {
            config,
            workspaces,
            scanner,
            repairer,
            git,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Production wiring: container sandbox, chat-completions repairer,
    /// `git` CLI. Fails if the repair service has no API key.
    pub fn from_config(config: HealConfig, store: Arc<dyn RunStore>) -> Result<Self> {
        config.validate()?;
        let executor = Arc::new(SandboxedExecutor::new(config.sandbox.clone()));
        let scanner = Arc::new(RepositoryScanner::new(config.analyzer.clone(), executor));
        let repairer = ChatCompletionRepairer::new(config.repair.clone())
            .map_err(|e| HealError::Config(e.to_string()))?;
        let git = Arc::new(CliGit::new(config.git.clone()));
        Ok(Self::new(config, scanner, Arc::new(repairer), git, store))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &HealConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    fn credentials(&self) -> Option<GitCredentials> {
        self.config.git_token.clone().map(GitCredentials::token)
    }

    async fn fail_record(&self, run_id: &RunId, reason: &str) {
        let summary = RunSummary {
            status: RecordStatus::Failed,
            iterations_used: 0,
            branch: None,
            failure_reason: Some(reason.to_string()),
            report_path: None,
        };
        if let Err(e) = self.store.finish_run(run_id, summary).await {
            obs::emit_bookkeeping_error(run_id.as_str(), &e);
        }
    }

    /// Run one job to completion. The run record must already exist in the
    /// store. `Err` means the run never reached the healing loop (clone
    /// failure) or its report could not be written; the record is finished
    /// as FAILED either way.
    pub async fn execute(&self, job: &HealJob, cancel: &CancellationFlag) -> Result<PipelineOutcome> {
        let run_id = &job.run_id;
        if let Err(e) = self.store.update_phase(run_id, RunPhase::Preparing, 0).await {
            obs::emit_bookkeeping_error(run_id.as_str(), &e);
        }

        let credentials = self.credentials();
        let workspace = match self
            .workspaces
            .materialize(run_id, &job.repository_url, credentials.as_ref())
            .await
        {
            Ok(workspace) => workspace,
            Err(e) => {
                self.fail_record(run_id, &e.to_string()).await;
                if let Err(cleanup) = self.workspaces.release(run_id).await {
                    tracing::warn!(run_id = %run_id, error = %cleanup, "failed to remove run directory");
                }
                return Err(e);
            }
        };

        let orchestrator = HealingOrchestrator::new(
            self.scanner.clone(),
            self.repairer.clone(),
            self.git.clone(),
            self.config.healing.clone(),
        )
        .with_clock(self.clock.clone())
        .with_store(self.store.clone());

        let request = HealRequest {
            run_id: run_id.clone(),
            workspace: workspace.path.clone(),
            team: job.team.clone(),
            leader: job.leader.clone(),
            credentials,
            remote_url: None,
        };
        let outcome = orchestrator.run(&request, cancel).await;

        let report = RunReport::from_outcome(
            &outcome,
            ReportContext {
                repository: &workspace.remote_url,
                team: &job.team,
                leader: &job.leader,
                max_iterations: self.config.healing.max_iterations,
            },
            &self.config.scoring,
        );
        let written = write_run_report(&report, &self.config.results_dir);

        let summary = RunSummary {
            status: record_status(outcome.status()),
            iterations_used: outcome.state.iteration_count(),
            branch: outcome.state.branch_name().map(str::to_string),
            failure_reason: outcome.state.failure_reason().map(str::to_string),
            report_path: written
                .as_ref()
                .ok()
                .map(|p| p.display().to_string()),
        };
        if let Err(e) = self.store.finish_run(run_id, summary).await {
            obs::emit_bookkeeping_error(run_id.as_str(), &e);
        }

        if !self.config.workspace.retain_after_run {
            if let Err(e) = self.workspaces.release(run_id).await {
                tracing::warn!(run_id = %run_id, error = %e, "failed to remove workspace");
            }
        }

        let report_path = written?;
        tracing::info!(
            run_id = %run_id,
            status = %report.final_status,
            score = report.score_breakdown.final_score,
            path = %report_path.display(),
            "run report written"
        );
        Ok(PipelineOutcome {
            outcome,
            report,
            report_path,
        })
    }
}
