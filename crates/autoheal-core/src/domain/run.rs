//! RunState: the orchestrator-owned state of one healing run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{HealError, Result};
use super::fix::FixAttempt;
use super::scan::{Degradation, ScanReport};

/// Run lifecycle status. `InProgress` → `Passed` | `Failed`, terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InProgress,
    Passed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::InProgress => "IN_PROGRESS",
            RunStatus::Passed => "PASSED",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    workspace_path: PathBuf,
    branch_name: Option<String>,
    iteration_count: u32,
    fix_ledger: Vec<FixAttempt>,
    status: RunStatus,
    failure_reason: Option<String>,
}

impl RunState {
    pub fn new(workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            workspace_path: workspace_path.into(),
            branch_name: None,
            iteration_count: 0,
            fix_ledger: Vec::new(),
            status: RunStatus::InProgress,
            failure_reason: None,
        }
    }

    /// Assign the fix branch. Write-once.
    pub fn assign_branch(&mut self, name: impl Into<String>) -> Result<()> {
        if let Some(existing) = &self.branch_name {
            return Err(HealError::BranchAlreadyAssigned(existing.clone()));
        }
        self.branch_name = Some(name.into());
        Ok(())
    }

    /// Start the next iteration and return its 1-based number.
    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration_count += 1;
        self.iteration_count
    }

    pub fn record(&mut self, attempt: FixAttempt) {
        self.fix_ledger.push(attempt);
    }

    /// Move to a terminal status. Fails if already terminal or `status` is not.
    pub fn conclude(&mut self, status: RunStatus, failure_reason: Option<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(HealError::RunConcluded(self.status.to_string()));
        }
        if !status.is_terminal() {
            return Err(HealError::RunConcluded(status.to_string()));
        }
        self.status = status;
        self.failure_reason = failure_reason;
        Ok(())
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    pub fn branch_name(&self) -> Option<&str> {
        self.branch_name.as_deref()
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn fix_ledger(&self) -> &[FixAttempt] {
        &self.fix_ledger
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn fixes_applied(&self) -> usize {
        self.fix_ledger.iter().filter(|f| f.applied()).count()
    }
}

/// Everything the orchestrator hands back when a run terminates.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub state: RunState,
    /// First scan of the run; `None` if the run failed before scanning.
    pub initial_scan: Option<ScanReport>,
    /// Scan that confirmed the terminal status.
    pub final_scan: Option<ScanReport>,
    /// Union of degradations seen across every scan of the run.
    pub degradations: Vec<Degradation>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    pub fn total_defects_detected(&self) -> usize {
        self.initial_scan
            .as_ref()
            .map(ScanReport::total_defect_count)
            .unwrap_or(0)
    }
}
