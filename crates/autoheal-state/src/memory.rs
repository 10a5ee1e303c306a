//! In-memory run store
//!
//! Provides `MemoryRunStore`, which satisfies the `RunStore` contract without
//! any external dependencies. It backs the run registry and the test suites.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    fixes: Vec<FixRecord>,
}

impl RunState {
    fn queued(run_id: &RunId, metadata: RunMetadata) -> Self {
        let now = Utc::now();
        Self {
            record: RunRecord {
                run_id: run_id.clone(),
                metadata,
                status: RecordStatus::Running,
                phase: RunPhase::Queued,
                iteration: 0,
                summary: None,
                created_at: now,
                updated_at: now,
                completed_at: None,
            },
            fixes: Vec::new(),
        }
    }
}

/// In-memory run store backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<RunId, RunState>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<RunId, RunState>> {
        // A poisoned lock still holds consistent per-run state.
        self.runs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Number of runs currently held, finished or not.
    pub fn len(&self) -> usize {
        self.runs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn active_run<'a>(
    runs: &'a mut HashMap<RunId, RunState>,
    run_id: &RunId,
) -> StorageResult<&'a mut RunState> {
    let state = runs
        .get_mut(run_id)
        .ok_or_else(|| StorageError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
    if state.record.status.is_terminal() {
        return Err(StorageError::InvalidRunState {
            run_id: run_id.to_string(),
            status: state.record.status.to_string(),
        });
    }
    Ok(state)
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, run_id: &RunId, metadata: RunMetadata) -> StorageResult<()> {
        let mut runs = self.runs();
        if runs.contains_key(run_id) {
            return Err(StorageError::DuplicateRun {
                run_id: run_id.to_string(),
            });
        }
        runs.insert(run_id.clone(), RunState::queued(run_id, metadata));
        Ok(())
    }

    async fn reopen_run(&self, run_id: &RunId, metadata: RunMetadata) -> StorageResult<()> {
        let mut runs = self.runs();
        let state = runs.get_mut(run_id).ok_or_else(|| StorageError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        if !state.record.status.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.to_string(),
                status: state.record.status.to_string(),
            });
        }
        *state = RunState::queued(run_id, metadata);
        tracing::debug!(run_id = %run_id, "finished run reopened");
        Ok(())
    }

    async fn update_phase(
        &self,
        run_id: &RunId,
        phase: RunPhase,
        iteration: u32,
    ) -> StorageResult<()> {
        let mut runs = self.runs();
        let state = active_run(&mut runs, run_id)?;
        state.record.phase = phase;
        state.record.iteration = iteration;
        state.record.updated_at = Utc::now();
        Ok(())
    }

    async fn append_fix(&self, run_id: &RunId, fix: FixRecord) -> StorageResult<()> {
        let mut runs = self.runs();
        let state = active_run(&mut runs, run_id)?;
        state.fixes.push(fix);
        state.record.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        let mut runs = self.runs();
        let state = active_run(&mut runs, run_id)?;
        if !summary.status.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.to_string(),
                status: summary.status.to_string(),
            });
        }
        let now = Utc::now();
        state.record.status = summary.status;
        state.record.phase = RunPhase::Finished;
        state.record.iteration = summary.iterations_used;
        state.record.summary = Some(summary);
        state.record.updated_at = now;
        state.record.completed_at = Some(now);
        Ok(())
    }

    async fn read_progress(&self, run_id: &RunId) -> StorageResult<RunProgress> {
        let runs = self.runs();
        let state = runs.get(run_id).ok_or_else(|| StorageError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        Ok(RunProgress {
            record: state.record.clone(),
            fixes: state.fixes.clone(),
        })
    }

    async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let mut runs = self.runs();
        let before = runs.len();
        runs.retain(|_, state| match state.record.completed_at {
            Some(done) => done >= cutoff,
            None => true,
        });
        let evicted = before - runs.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted finished runs");
        }
        Ok(evicted)
    }
}
