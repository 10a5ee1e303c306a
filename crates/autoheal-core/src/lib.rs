//! autoheal core library
//!
//! Scans a repository for defects, asks a code-repair service for fixes,
//! verifies them in a sandbox, and delivers each fix as a commit on a
//! dedicated branch.

pub mod analyzer;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod git;
pub mod obs;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod repair;
pub mod report;
pub mod sandbox;
pub mod scanner;
pub mod telemetry;
pub mod workspace;

pub use domain::{
    Defect, DefectCategory, Degradation, ExecutionMode, ExecutionResult, FixAttempt, HealError,
    Language, Result, RunOutcome, RunState, RunStatus, ScanReport, TestVerdict,
};

pub use classifier::{classify, Classification};

pub use config::HealConfig;

pub use obs::RunSpan;

pub use telemetry::init_tracing;

pub use git::{fix_branch_name, CliGit, CommitRequest, GitCredentials, GitOps, GitOutcome};

pub use orchestrator::{CancellationFlag, HealRequest, HealingConfig, HealingOrchestrator};

pub use pipeline::{HealJob, HealingPipeline, PipelineOutcome};

pub use registry::{RegistryConfig, RunRegistry};

pub use repair::{ChatCompletionRepairer, RepairConfig, RepairError, RepairGenerator};

pub use report::{read_run_report, write_run_report, RunReport, ScoringPolicy};

pub use sandbox::{SandboxConfig, SandboxedExecutor, TestExecutor};

pub use scanner::{AnalyzerConfig, RepositoryScanner, Scanner};

pub use workspace::{Workspace, WorkspaceConfig, WorkspaceManager};

pub use autoheal_state::{MemoryRunStore, RunId, RunStore};
