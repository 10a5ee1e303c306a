//! Background runs through the registry: clone from a local repository,
//! heal with scripted collaborators, poll, wait, evict.

use std::path::Path;
use std::process::Command as StdCommand;
use std::sync::Arc;

use autoheal_core::config::HealConfig;
use autoheal_core::domain::{Defect, DefectCategory, HealError, RunStatus, ScanReport};
use autoheal_core::fakes::{RecordingGit, ScriptedRepairer, ScriptedScanner};
use autoheal_core::pipeline::HealingPipeline;
use autoheal_core::registry::{RegistryConfig, RunRegistry};
use autoheal_core::report::read_run_report;
use autoheal_state::{MemoryRunStore, RecordStatus, RunId};

fn run_git(repo_dir: &Path, args: &[&str]) {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// `<tmp>/calc` holding one committed Python file.
fn make_source_repo() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("calc");
    std::fs::create_dir_all(&repo).unwrap();
    run_git(&repo, &["init"]);
    run_git(&repo, &["config", "user.name", "test-user"]);
    run_git(&repo, &["config", "user.email", "test@example.com"]);
    std::fs::write(repo.join("calc.py"), "def add(a, b)\n    return a + b\n").unwrap();
    run_git(&repo, &["add", "-A"]);
    run_git(&repo, &["commit", "-m", "initial"]);
    let url = repo.to_str().unwrap().to_string();
    (dir, url)
}

struct Harness {
    _scratch: tempfile::TempDir,
    results_dir: std::path::PathBuf,
    base_dir: std::path::PathBuf,
    git: Arc<RecordingGit>,
    registry: RunRegistry,
}

fn harness(scanner: ScriptedScanner, ttl_secs: u64) -> Harness {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = HealConfig::default();
    config.workspace.base_dir = scratch.path().join("repos");
    config.results_dir = scratch.path().join("results");
    let results_dir = config.results_dir.clone();
    let base_dir = config.workspace.base_dir.clone();

    let git = Arc::new(RecordingGit::new());
    let pipeline = HealingPipeline::new(
        config,
        Arc::new(scanner),
        Arc::new(ScriptedRepairer::new()),
        git.clone(),
        Arc::new(MemoryRunStore::new()),
    );
    let registry = RunRegistry::new(
        Arc::new(pipeline),
        RegistryConfig {
            finished_ttl_secs: ttl_secs,
            sweep_interval_secs: 1,
        },
    );
    Harness {
        _scratch: scratch,
        results_dir,
        base_dir,
        git,
        registry,
    }
}

fn syntax_then_clean() -> ScriptedScanner {
    ScriptedScanner::new([
        ScanReport::new(
            ".",
            vec![Defect::new("calc.py", 1, DefectCategory::Syntax, "missing colon", "add ':'")],
            Vec::new(),
        ),
        ScanReport::new(".", Vec::new(), Vec::new()),
    ])
}

#[tokio::test]
async fn test_submitted_run_heals_and_reports() {
    let (_src, url) = make_source_repo();
    let h = harness(syntax_then_clean(), 3600);

    let run_id = h.registry.submit(&url, "Code Warriors", "Jane Doe").await.unwrap();
    let finished = h.registry.wait(&run_id).await.unwrap();

    assert_eq!(finished.outcome.status(), RunStatus::Passed);
    assert_eq!(finished.report.total_fixes_applied, 1);
    assert_eq!(finished.report.repository, url);
    assert_eq!(h.git.commits().len(), 1);

    let progress = h.registry.progress(&run_id).await.unwrap();
    assert_eq!(progress.record.status, RecordStatus::Passed);
    assert_eq!(progress.fixes_applied(), 1);
    let summary = progress.record.summary.unwrap();
    assert_eq!(summary.branch.as_deref(), Some("CODE_WARRIORS_JANE_DOE_AI_FIX"));

    let stored = read_run_report(run_id.as_str(), &h.results_dir).unwrap();
    assert_eq!(stored, finished.report);
    // Workspace is removed once the run is over.
    assert!(!h.base_dir.join(run_id.as_str()).exists());
    assert!(h.registry.active().is_empty());
}

#[tokio::test]
async fn test_result_can_be_taken_once() {
    let (_src, url) = make_source_repo();
    let h = harness(syntax_then_clean(), 3600);

    let run_id = h.registry.submit(&url, "a", "b").await.unwrap();
    h.registry.wait(&run_id).await.unwrap();
    let again = h.registry.wait(&run_id).await.unwrap_err();
    assert!(matches!(again, HealError::UnknownRun(_)));

    let unknown = h.registry.wait(&RunId::from("nope")).await.unwrap_err();
    assert!(matches!(unknown, HealError::UnknownRun(_)));
    assert!(!h.registry.cancel(&RunId::from("nope")));
}

#[tokio::test]
async fn test_clone_failure_finishes_record_as_failed() {
    let h = harness(syntax_then_clean(), 3600);
    let missing = h.base_dir.join("no-such-source").join("calc");

    let run_id = h
        .registry
        .submit(missing.to_str().unwrap(), "a", "b")
        .await
        .unwrap();
    let err = h.registry.wait(&run_id).await.unwrap_err();
    assert!(matches!(err, HealError::CloneFailed { .. }), "got {err}");

    let progress = h.registry.progress(&run_id).await.unwrap();
    assert_eq!(progress.record.status, RecordStatus::Failed);
    assert!(progress.record.summary.unwrap().failure_reason.is_some());
}

#[tokio::test]
async fn test_finished_runs_are_evicted_after_ttl() {
    let (_src, url) = make_source_repo();
    let h = harness(syntax_then_clean(), 0);

    let run_id = h.registry.submit(&url, "a", "b").await.unwrap();
    h.registry.wait(&run_id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let evicted = h.registry.evict_expired().await.unwrap();
    assert_eq!(evicted, 1);
    assert!(h.registry.progress(&run_id).await.is_err());
}

#[tokio::test]
async fn test_sweeper_evicts_in_background() {
    let (_src, url) = make_source_repo();
    let h = harness(syntax_then_clean(), 0);
    let registry = Arc::new(h.registry);
    let sweeper = registry.spawn_sweeper();

    let run_id = registry.submit(&url, "a", "b").await.unwrap();
    registry.wait(&run_id).await.unwrap();

    let mut evicted = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if registry.progress(&run_id).await.is_err() {
            evicted = true;
            break;
        }
    }
    assert!(evicted, "finished run was not swept");
    sweeper.abort();
}

#[tokio::test]
async fn test_finished_run_resumes_under_same_id() {
    let (_src, url) = make_source_repo();
    let h = harness(syntax_then_clean(), 3600);

    let run_id = h.registry.submit(&url, "a", "b").await.unwrap();
    let first = h.registry.wait(&run_id).await.unwrap();
    assert_eq!(first.report.total_fixes_applied, 1);

    let resumed = h.registry.resume(&run_id, &url, "a", "b").await.unwrap();
    assert_eq!(resumed, run_id);
    let second = h.registry.wait(&run_id).await.unwrap();

    assert_eq!(second.outcome.status(), RunStatus::Passed);
    assert_eq!(second.report.total_fixes_applied, 0);
    let progress = h.registry.progress(&run_id).await.unwrap();
    assert_eq!(progress.record.status, RecordStatus::Passed);
    // The ledger belongs to the latest attempt only.
    assert_eq!(progress.fixes_applied(), 0);
}

#[tokio::test]
async fn test_resuming_an_evicted_run_recreates_it() {
    let (_src, url) = make_source_repo();
    let h = harness(syntax_then_clean(), 3600);
    let run_id = RunId::from("run-evicted");
    assert!(h.registry.progress(&run_id).await.is_err());

    h.registry.resume(&run_id, &url, "a", "b").await.unwrap();
    let finished = h.registry.wait(&run_id).await.unwrap();

    assert_eq!(finished.outcome.status(), RunStatus::Passed);
    assert_eq!(
        h.registry.progress(&run_id).await.unwrap().record.status,
        RecordStatus::Passed
    );
}
