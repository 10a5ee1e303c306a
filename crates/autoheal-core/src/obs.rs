//! Structured observability hooks for healing-run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`] and the `RunSpan` RAII guard
//! - One emission function per state transition of a run
//!
//! Events are emitted at `info!` level except `sandbox.degraded`, which is a
//! security-relevant state change and is emitted at `warn!`.
//! Filtering follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::domain::{DefectCategory, RunStatus};

/// Span carrying `run_id`. Use with `tracing::Instrument` for async work.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("autoheal.run", run_id = %run_id)
}

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// Only for code that stays on one thread; async tasks should instrument
/// their future with [`run_span`] instead.
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // every event below carries run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// Emit event: healing loop started on a workspace.
///
/// ```ignore
/// emit_run_started("run-123", "/tmp/autoheal_repos/run-123/calc", 5);
/// // logs: event=run.started run_id=run-123 workspace=... max_iterations=5
/// ```
pub fn emit_run_started(run_id: &str, workspace: &str, max_iterations: u32) {
    info!(
        event = "run.started",
        run_id = %run_id,
        workspace = %workspace,
        max_iterations = max_iterations,
    );
}

/// Emit event: iteration N of a run begins.
pub fn emit_iteration_started(run_id: &str, iteration: u32) {
    info!(event = "iteration.started", run_id = %run_id, iteration = iteration);
}

pub fn emit_scan_started(run_id: &str, source_root: &str) {
    info!(event = "scan.started", run_id = %run_id, source_root = %source_root);
}

/// Emit event: scan finished with defect and degradation counts.
pub fn emit_scan_finished(run_id: &str, defects: usize, degradations: usize, duration_ms: u64) {
    info!(
        event = "scan.finished",
        run_id = %run_id,
        defects = defects,
        degradations = degradations,
        duration_ms = duration_ms,
    );
}

/// Emit event: a repair was attempted for one defect.
pub fn emit_repair_attempted(
    run_id: &str,
    file: &str,
    category: DefectCategory,
    line: u32,
    produced: bool,
) {
    info!(
        event = "repair.attempted",
        run_id = %run_id,
        file = %file,
        category = %category,
        line = line,
        produced = produced,
    );
}

/// Emit event: commit/push result for one fix.
pub fn emit_push_result(
    run_id: &str,
    branch: &str,
    success: bool,
    commit_id: Option<&str>,
    reason: Option<&dyn std::fmt::Display>,
) {
    match reason {
        Some(reason) => info!(
            event = "push.result",
            run_id = %run_id,
            branch = %branch,
            success = success,
            commit_id = commit_id.unwrap_or(""),
            reason = %reason,
        ),
        None => info!(
            event = "push.result",
            run_id = %run_id,
            branch = %branch,
            success = success,
            commit_id = commit_id.unwrap_or(""),
        ),
    }
}

/// Emit event: tests are about to run without the container sandbox.
pub fn emit_sandbox_degraded(runtime: &str, workspace: &str) {
    warn!(
        event = "sandbox.degraded",
        runtime = %runtime,
        workspace = %workspace,
        "container runtime unavailable; executing tests directly on the host"
    );
}

pub fn emit_run_cancelled(run_id: &str, iteration: u32) {
    info!(event = "run.cancelled", run_id = %run_id, iteration = iteration);
}

/// Emit event: run reached a terminal status.
pub fn emit_run_finished(
    run_id: &str,
    status: RunStatus,
    iterations_used: u32,
    fixes_applied: usize,
    duration_ms: u64,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        iterations_used = iterations_used,
        fixes_applied = fixes_applied,
        duration_ms = duration_ms,
    );
}

/// Emit event: bookkeeping write failed (warning level). Never fatal.
pub fn emit_bookkeeping_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.bookkeeping_error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
        emit_iteration_started("test-run-id", 1);
    }
}
