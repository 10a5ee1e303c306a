//! autoheal - automated defect repair for source repositories
//!
//! ## Commands
//!
//! - `run`: clone a repository, heal it, push fixes to a dedicated branch
//! - `scan`: scan a local checkout and print the defect report
//! - `report`: print a stored run report after verifying its digest
//! - `branch-name`: print the fix branch name for a team and leader

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use autoheal_core::report::read_run_report;
use autoheal_core::{
    fix_branch_name, HealConfig, HealingPipeline, RepositoryScanner, RunRegistry, RunSpan,
    RunStatus, SandboxedExecutor, Scanner,
};
use autoheal_state::{MemoryRunStore, RunId, RunPhase};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "autoheal")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Detect, repair and deliver fixes for repository defects", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true, env = "AUTOHEAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Heal a remote repository and push fixes to `<TEAM>_<LEADER>_AI_FIX`
    Run {
        /// Repository URL to clone
        repository: String,

        /// Team name, used in the fix branch name
        #[arg(long)]
        team: String,

        /// Team leader name, used in the fix branch name
        #[arg(long)]
        leader: String,

        /// Override `healing.max_iterations`
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Override `results_dir`
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Keep the working copy after the run
        #[arg(long)]
        keep_workspace: bool,

        /// Continue an earlier run, reopening the working copy it kept
        #[arg(long, value_name = "RUN_ID")]
        resume: Option<String>,

        /// Progress polling interval in milliseconds
        #[arg(long, default_value = "500")]
        poll_ms: u64,
    },

    /// Scan a local checkout without modifying it
    Scan {
        /// Checkout to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Skip test execution
        #[arg(long)]
        no_tests: bool,
    },

    /// Print a stored run report
    Report {
        /// Run ID
        run: String,

        /// Override `results_dir`
        #[arg(long)]
        results_dir: Option<PathBuf>,
    },

    /// Print the fix branch name for a team and leader
    BranchName {
        #[arg(long)]
        team: String,

        #[arg(long)]
        leader: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    autoheal_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            repository,
            team,
            leader,
            max_iterations,
            results_dir,
            keep_workspace,
            resume,
            poll_ms,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(max) = max_iterations {
                config.healing.max_iterations = max;
            }
            if let Some(dir) = results_dir {
                config.results_dir = dir;
            }
            config.workspace.retain_after_run |= keep_workspace;
            let resume = resume.as_deref().map(RunId::from);
            if resume.is_some() {
                config.workspace.reuse_existing = true;
                config.workspace.retain_after_run = true;
            }
            cmd_run(config, &repository, &team, &leader, resume, poll_ms).await
        }
        Commands::Scan { path, no_tests } => {
            let mut config = load_config(cli.config.as_deref())?;
            if no_tests {
                config.analyzer.run_tests = false;
            }
            cmd_scan(&config, &path).await
        }
        Commands::Report { run, results_dir } => {
            let config = load_config(cli.config.as_deref())?;
            let dir = results_dir.unwrap_or(config.results_dir);
            cmd_report(&run, &dir)
        }
        Commands::BranchName { team, leader } => cmd_branch_name(&team, &leader),
    }
}

fn load_config(path: Option<&Path>) -> Result<HealConfig> {
    let mut config = HealConfig::load(path).context("Failed to load configuration")?;
    config.apply_env();
    Ok(config)
}

fn phase_label(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Queued => "queued",
        RunPhase::Preparing => "cloning",
        RunPhase::Scanning => "scanning",
        RunPhase::Repairing => "repairing",
        RunPhase::Verifying => "verifying",
        RunPhase::Finished => "finished",
    }
}

/// Heal one repository in the background and follow its progress.
async fn cmd_run(
    config: HealConfig,
    repository: &str,
    team: &str,
    leader: &str,
    resume: Option<RunId>,
    poll_ms: u64,
) -> Result<()> {
    let registry_config = config.registry.clone();
    let store = Arc::new(MemoryRunStore::new());
    let pipeline =
        HealingPipeline::from_config(config, store).context("Failed to set up healing pipeline")?;
    let registry = RunRegistry::new(Arc::new(pipeline), registry_config);

    let run_id = match resume {
        Some(run_id) => registry.resume(&run_id, repository, team, leader).await,
        None => registry.submit(repository, team, leader).await,
    }
    .context("Failed to register run")?;
    let _span = RunSpan::enter(run_id.as_str());
    info!(repository = %repository, "run submitted");
    println!("Run {run_id} started for {repository}");

    let waiter = registry.wait(&run_id);
    tokio::pin!(waiter);
    let mut ticker = tokio::time::interval(Duration::from_millis(poll_ms.max(50)));
    let mut last_seen: Option<(RunPhase, u32, usize)> = None;
    let mut cancelled = false;

    let finished = loop {
        tokio::select! {
            result = &mut waiter => break result,
            _ = ticker.tick() => {
                let Ok(progress) = registry.progress(&run_id).await else {
                    continue;
                };
                let seen = (progress.record.phase, progress.record.iteration, progress.fixes.len());
                if last_seen != Some(seen) {
                    println!(
                        "  [{}] iteration {} - {} fix(es) applied, {} failed",
                        phase_label(seen.0),
                        seen.1,
                        progress.fixes_applied(),
                        progress.fixes_failed()
                    );
                    last_seen = Some(seen);
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                registry.cancel(&run_id);
                cancelled = true;
                println!("Cancellation requested; stopping after the current iteration");
            }
        }
    };

    let finished = finished.with_context(|| format!("Run {run_id} did not complete"))?;
    let report = &finished.report;
    println!();
    println!("Status:      {}", report.final_status);
    if let Some(branch) = &report.branch {
        println!("Branch:      {branch}");
    }
    println!(
        "Iterations:  {}/{}",
        report.iterations_used, report.max_iterations
    );
    println!(
        "Defects:     {} detected, {} fixed",
        report.total_defects_detected, report.total_fixes_applied
    );
    println!("Score:       {}", report.score_breakdown.final_score);
    println!("Report:      {}", finished.report_path.display());

    if report.final_status != RunStatus::Passed {
        bail!(
            "run {} failed: {}",
            run_id,
            report.failure_reason.as_deref().unwrap_or("defects remain")
        );
    }
    Ok(())
}

/// Scan a local checkout and print the report as JSON.
async fn cmd_scan(config: &HealConfig, path: &Path) -> Result<()> {
    let executor = Arc::new(SandboxedExecutor::new(config.sandbox.clone()));
    let scanner = RepositoryScanner::new(config.analyzer.clone(), executor);
    let report = scanner
        .scan(path)
        .await
        .with_context(|| format!("Failed to scan {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_report(run: &str, results_dir: &Path) -> Result<()> {
    let report = read_run_report(run, results_dir)
        .with_context(|| format!("Failed to load report for run '{run}'"))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_branch_name(team: &str, leader: &str) -> Result<()> {
    let branch = fix_branch_name(team, leader).context("Invalid team or leader name")?;
    println!("{branch}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "autoheal",
            "--verbose",
            "run",
            "https://github.com/acme/calc.git",
            "--team",
            "Code Warriors",
            "--leader",
            "Jane Doe",
            "--max-iterations",
            "3",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                repository,
                team,
                max_iterations,
                keep_workspace,
                ..
            } => {
                assert_eq!(repository, "https://github.com/acme/calc.git");
                assert_eq!(team, "Code Warriors");
                assert_eq!(max_iterations, Some(3));
                assert!(!keep_workspace);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_resume_takes_a_run_id() {
        let cli = Cli::try_parse_from([
            "autoheal",
            "run",
            "https://github.com/acme/calc.git",
            "--team",
            "a",
            "--leader",
            "b",
            "--resume",
            "run-42",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { resume, .. } => assert_eq!(resume.as_deref(), Some("run-42")),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_branch_name_rejects_empty_input() {
        assert!(cmd_branch_name("Code Warriors", "Jane Doe").is_ok());
        assert!(cmd_branch_name("", "Jane Doe").is_err());
    }

    #[tokio::test]
    async fn test_scan_prints_for_local_checkout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "import foo\n").unwrap();
        let mut config = HealConfig::default();
        config.analyzer.run_tests = false;
        config.analyzer.lint = false;
        cmd_scan(&config, dir.path()).await.unwrap();
    }

    #[test]
    fn test_report_for_unknown_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_report("missing", dir.path()).is_err());
    }
}
