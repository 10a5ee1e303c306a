//! Background run registry.
//!
//! Runs execute off the caller's path as tokio tasks; callers poll progress
//! by [`RunId`], request cooperative cancellation, or await the result.
//! Finished runs are evicted from the store after a TTL so bookkeeping does
//! not grow for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use autoheal_state::{RunId, RunMetadata, RunProgress, RunStore, StorageError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::domain::{HealError, Result};
use crate::obs;
use crate::orchestrator::CancellationFlag;
use crate::pipeline::{HealJob, HealingPipeline, PipelineOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long a finished run stays pollable.
    pub finished_ttl_secs: u64,
    /// Interval of the background eviction sweep.
    pub sweep_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            finished_ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

fn run_metadata(repository_url: &str, team: &str, leader: &str) -> RunMetadata {
    RunMetadata {
        repository: repository_url.to_string(),
        team: team.to_string(),
        leader: leader.to_string(),
        tags: serde_json::json!({}),
    }
}

struct RunHandle {
    cancel: CancellationFlag,
    task: Option<JoinHandle<Result<PipelineOutcome>>>,
}

pub struct RunRegistry {
    pipeline: Arc<HealingPipeline>,
    config: RegistryConfig,
    runs: Mutex<HashMap<RunId, RunHandle>>,
}

impl RunRegistry {
    pub fn new(pipeline: Arc<HealingPipeline>, config: RegistryConfig) -> Self {
        Self {
            pipeline,
            config,
            runs: Mutex::new(HashMap::new()),
        }
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<RunId, RunHandle>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store(&self) -> &Arc<dyn RunStore> {
        self.pipeline.store()
    }

    /// Register a run and start it in the background.
    pub async fn submit(&self, repository_url: &str, team: &str, leader: &str) -> Result<RunId> {
        let run_id = RunId::new();
        let metadata = run_metadata(repository_url, team, leader);
        self.store().create_run(&run_id, metadata).await?;
        self.start(run_id, repository_url, team, leader)
    }

    /// Start a finished (or evicted) run again under its existing id. With
    /// `workspace.retain_after_run` and `workspace.reuse_existing` the run
    /// reopens the clone it left behind instead of cloning afresh.
    pub async fn resume(
        &self,
        run_id: &RunId,
        repository_url: &str,
        team: &str,
        leader: &str,
    ) -> Result<RunId> {
        if self.active().contains(run_id) {
            return Err(HealError::RunActive(run_id.to_string()));
        }
        let metadata = run_metadata(repository_url, team, leader);
        match self.store().reopen_run(run_id, metadata.clone()).await {
            Ok(()) => {}
            Err(StorageError::RunNotFound { .. }) => {
                self.store().create_run(run_id, metadata).await?;
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(run_id = %run_id, "run resumed");
        self.start(run_id.clone(), repository_url, team, leader)
    }

    fn start(&self, run_id: RunId, repository_url: &str, team: &str, leader: &str) -> Result<RunId> {
        let job = HealJob {
            run_id: run_id.clone(),
            repository_url: repository_url.to_string(),
            team: team.to_string(),
            leader: leader.to_string(),
        };
        let cancel = CancellationFlag::new();
        let pipeline = self.pipeline.clone();
        let task_cancel = cancel.clone();
        let span = obs::run_span(run_id.as_str());
        let task = tokio::spawn(
            async move { pipeline.execute(&job, &task_cancel).await }.instrument(span),
        );

        self.runs().insert(
            run_id.clone(),
            RunHandle {
                cancel,
                task: Some(task),
            },
        );
        Ok(run_id)
    }

    /// Current bookkeeping for a run.
    pub async fn progress(&self, run_id: &RunId) -> Result<RunProgress> {
        Ok(self.store().read_progress(run_id).await?)
    }

    /// Ask a run to stop at its next iteration boundary. `false` if the run
    /// is unknown to this registry.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        match self.runs().get(run_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for a run's task. Each run's result can be taken once.
    pub async fn wait(&self, run_id: &RunId) -> Result<PipelineOutcome> {
        let task = self
            .runs()
            .get_mut(run_id)
            .and_then(|handle| handle.task.take())
            .ok_or_else(|| HealError::UnknownRun(run_id.to_string()))?;
        task.await
            .map_err(|e| HealError::Scan(format!("run task failed: {e}")))?
    }

    /// Ids of runs whose tasks are still executing.
    pub fn active(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self
            .runs()
            .iter()
            .filter(|(_, h)| h.task.as_ref().is_some_and(|t| !t.is_finished()))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop runs that finished more than the TTL ago. Returns how many
    /// records were evicted.
    pub async fn evict_expired(&self) -> Result<usize> {
        let ttl = chrono::Duration::seconds(self.config.finished_ttl_secs as i64);
        let cutoff = Utc::now() - ttl;
        let evicted = self.store().evict_finished_before(cutoff).await?;

        // Forget handles whose record is gone.
        let ids: Vec<RunId> = self.runs().keys().cloned().collect();
        for id in ids {
            if self.store().read_progress(&id).await.is_err() {
                self.runs().remove(&id);
            }
        }
        Ok(evicted)
    }

    /// Periodically call [`RunRegistry::evict_expired`] until the registry
    /// is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                if let Err(e) = registry.evict_expired().await {
                    tracing::warn!(error = %e, "run eviction failed");
                }
            }
        })
    }
}
