//! Domain models for autoheal.
//!
//! Canonical definitions for the core entities:
//! - `Defect`: a located, categorized problem
//! - `ScanReport`: one full-repository scan
//! - `ExecutionResult`: one test-suite execution
//! - `FixAttempt`: one repair of one defect
//! - `RunState`: the state of one healing run

pub mod defect;
pub mod error;
pub mod execution;
pub mod fix;
pub mod run;
pub mod scan;

// Re-export main types and errors
pub use defect::{CategoryHistogram, Defect, DefectCategory};
pub use error::{HealError, Result};
pub use execution::{
    ExecutionMode, ExecutionResult, Language, TestFailure, TestReport, TestVerdict,
};
pub use fix::{commit_summary, FixAttempt, FixStage, FixStatus};
pub use run::{RunOutcome, RunState, RunStatus};
pub use scan::{Degradation, ScanReport};
