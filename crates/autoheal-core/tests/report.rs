//! Run report construction, persistence and tamper detection.

use std::sync::Arc;

use autoheal_core::domain::{Defect, DefectCategory, HealError, RunStatus, ScanReport};
use autoheal_core::fakes::{FixedClock, RecordingGit, ScriptedRepairer, ScriptedScanner};
use autoheal_core::orchestrator::{
    CancellationFlag, HealRequest, HealingConfig, HealingOrchestrator,
};
use autoheal_core::report::{
    read_run_report, write_run_report, FixEntryStatus, ReportContext, RunReport, ScoringPolicy,
};
use autoheal_state::RunId;
use chrono::{TimeZone, Utc};

async fn sample_report() -> RunReport {
    let ws = tempfile::tempdir().unwrap();
    std::fs::write(ws.path().join("a.py"), "x = 1\n").unwrap();
    std::fs::write(ws.path().join("b.py"), "y = 2\n").unwrap();

    let scanner = Arc::new(ScriptedScanner::new([
        ScanReport::new(
            ws.path(),
            vec![
                Defect::new("a.py", 1, DefectCategory::Syntax, "bad", "fix"),
                Defect::new("b.py", 2, DefectCategory::Import, "bad", "fix"),
            ],
            Vec::new(),
        ),
        ScanReport::new(ws.path(), Vec::new(), Vec::new()),
    ]));
    let repairer = Arc::new(ScriptedRepairer::new().with_failure("b.py", "no idea"));
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()));

    let orchestrator = HealingOrchestrator::new(
        scanner,
        repairer,
        Arc::new(RecordingGit::new()),
        HealingConfig::default(),
    )
    .with_clock(clock);
    let outcome = orchestrator
        .run(
            &HealRequest {
                run_id: RunId::from("run-report"),
                workspace: ws.path().to_path_buf(),
                team: "Code Warriors".to_string(),
                leader: "Jane Doe".to_string(),
                credentials: None,
                remote_url: None,
            },
            &CancellationFlag::new(),
        )
        .await;

    RunReport::from_outcome(
        &outcome,
        ReportContext {
            repository: "https://github.com/acme/calc.git",
            team: "Code Warriors",
            leader: "Jane Doe",
            max_iterations: 5,
        },
        &ScoringPolicy::default(),
    )
}

#[tokio::test]
async fn test_report_reflects_ledger() {
    let report = sample_report().await;

    assert_eq!(report.final_status, RunStatus::Passed);
    assert_eq!(report.branch.as_deref(), Some("CODE_WARRIORS_JANE_DOE_AI_FIX"));
    assert_eq!(report.total_defects_detected, 2);
    assert_eq!(report.total_fixes_applied, 1);
    assert_eq!(report.iterations_used, 2);
    assert_eq!(report.fixes.len(), 2);
    assert_eq!(report.fixes[0].status, FixEntryStatus::Fixed);
    assert!(report.fixes[0].commit_message.starts_with("[AI-AGENT] "));
    assert_eq!(report.fixes[1].status, FixEntryStatus::Failed);
    assert!(report.fixes[1].failure_reason.as_deref().unwrap().contains("no idea"));

    // Frozen clock: zero elapsed time earns the speed bonus.
    assert_eq!(report.time_taken_seconds, 0.0);
    assert_eq!(report.score_breakdown.final_score, 110);
}

#[tokio::test]
async fn test_report_round_trips_through_disk() {
    let report = sample_report().await;
    let dir = tempfile::tempdir().unwrap();

    let path = write_run_report(&report, dir.path()).unwrap();
    assert!(path.ends_with("run-report/results.json"));
    assert!(dir.path().join("run-report/results.digest").exists());

    let loaded = read_run_report("run-report", dir.path()).unwrap();
    assert_eq!(loaded, report);
}

#[tokio::test]
async fn test_tampered_report_is_rejected() {
    let report = sample_report().await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_run_report(&report, dir.path()).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replace("\"PASSED\"", "\"FAILED\"")).unwrap();

    let err = read_run_report("run-report", dir.path()).unwrap_err();
    assert!(matches!(err, HealError::DigestMismatch { .. }), "got {err}");
}

#[tokio::test]
async fn test_missing_report_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_run_report("nope", dir.path()).unwrap_err();
    assert!(matches!(err, HealError::Io(_)));
}
