//! Run report: the persisted summary of one healing run.
//!
//! Written as `<results_dir>/<run_id>/results.json` next to
//! `results.digest` (SHA-256 of the JSON bytes) and verified on read.

use std::path::{Path, PathBuf};

use autoheal_state::ContentDigest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Degradation, HealError, Result, RunOutcome, RunStatus};

/// Scoring knobs. The defaults reproduce the product's published formula;
/// none of them affect healing behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub base: i64,
    pub speed_bonus: i64,
    /// Runs strictly faster than this earn the speed bonus.
    pub speed_threshold_secs: u64,
    /// Commits allowed before the efficiency penalty starts.
    pub commit_allowance: u64,
    pub penalty_per_commit: i64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            base: 100,
            speed_bonus: 10,
            speed_threshold_secs: 300,
            commit_allowance: 20,
            penalty_per_commit: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base: i64,
    pub speed_bonus: i64,
    pub efficiency_penalty: i64,
    pub final_score: i64,
}

impl ScoringPolicy {
    pub fn score(&self, time_taken_secs: f64, commits: usize) -> ScoreBreakdown {
        let speed_bonus = if time_taken_secs < self.speed_threshold_secs as f64 {
            self.speed_bonus
        } else {
            0
        };
        let over = (commits as u64).saturating_sub(self.commit_allowance);
        let efficiency_penalty = (over as i64).saturating_mul(self.penalty_per_commit);
        ScoreBreakdown {
            base: self.base,
            speed_bonus,
            efficiency_penalty,
            final_score: self.base + speed_bonus - efficiency_penalty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixEntryStatus {
    Fixed,
    Failed,
}

/// One row of the fixes table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixEntry {
    pub file: String,
    pub category: String,
    pub line: u32,
    pub commit_message: String,
    pub status: FixEntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Persisted run artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub repository: String,
    pub branch: Option<String>,
    pub team: String,
    pub leader: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub time_taken_seconds: f64,
    pub total_defects_detected: usize,
    pub total_fixes_applied: usize,
    pub final_status: RunStatus,
    pub score_breakdown: ScoreBreakdown,
    pub fixes: Vec<FixEntry>,
    pub iterations_used: u32,
    pub max_iterations: u32,
    pub degradations: Vec<Degradation>,
    pub failure_reason: Option<String>,
}

/// Identity of the run, beyond what the orchestrator tracks.
#[derive(Debug, Clone, Copy)]
pub struct ReportContext<'a> {
    pub repository: &'a str,
    pub team: &'a str,
    pub leader: &'a str,
    pub max_iterations: u32,
}

impl RunReport {
    pub fn from_outcome(outcome: &RunOutcome, context: ReportContext<'_>, policy: &ScoringPolicy) -> Self {
        let elapsed = outcome.finished_at - outcome.started_at;
        let time_taken_seconds = (elapsed.num_milliseconds().max(0) as f64 / 1000.0 * 100.0).round() / 100.0;
        let state = &outcome.state;
        let fixes: Vec<FixEntry> = state
            .fix_ledger()
            .iter()
            .map(|attempt| FixEntry {
                file: attempt.defect.file.clone(),
                category: attempt.defect.category.to_string(),
                line: attempt.defect.line,
                commit_message: attempt.commit_message.clone(),
                status: if attempt.applied() {
                    FixEntryStatus::Fixed
                } else {
                    FixEntryStatus::Failed
                },
                commit_sha: attempt.commit_sha().map(str::to_string),
                failure_reason: attempt.failure_reason().map(str::to_string),
            })
            .collect();
        let total_fixes_applied = state.fixes_applied();

        Self {
            run_id: outcome.run_id.clone(),
            repository: context.repository.to_string(),
            branch: state.branch_name().map(str::to_string),
            team: context.team.to_string(),
            leader: context.leader.to_string(),
            start_time: outcome.started_at,
            end_time: outcome.finished_at,
            time_taken_seconds,
            total_defects_detected: outcome.total_defects_detected(),
            total_fixes_applied,
            final_status: state.status(),
            score_breakdown: policy.score(time_taken_seconds, total_fixes_applied),
            fixes,
            iterations_used: state.iteration_count(),
            max_iterations: context.max_iterations,
            degradations: outcome.degradations.clone(),
            failure_reason: state.failure_reason().map(str::to_string),
        }
    }
}

const REPORT_FILE: &str = "results.json";
const DIGEST_FILE: &str = "results.digest";

/// Persist `<dir>/<run_id>/results.json` and `<dir>/<run_id>/results.digest`.
pub fn write_run_report(report: &RunReport, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&report.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let report_path = run_dir.join(REPORT_FILE);
    let json = serde_json::to_vec_pretty(report)?;
    let digest = ContentDigest::from_bytes(&json);

    std::fs::write(&report_path, &json)?;
    std::fs::write(run_dir.join(DIGEST_FILE), digest.as_str().as_bytes())?;

    Ok(report_path)
}

/// Read and verify `<dir>/<run_id>/results.json`.
pub fn read_run_report(run_id: &str, dir: &Path) -> Result<RunReport> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join(REPORT_FILE))?;
    let expected = std::fs::read_to_string(run_dir.join(DIGEST_FILE))?;
    let actual = ContentDigest::from_bytes(&json);
    if expected.trim() != actual.as_str() {
        return Err(HealError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual: actual.as_str().to_string(),
        });
    }
    Ok(serde_json::from_slice(&json)?)
}
