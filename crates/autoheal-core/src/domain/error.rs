//! Domain-level error taxonomy for autoheal.
//!
//! Only structural failures surface as `HealError`. Expected failure modes of
//! external collaborators (push rejected, nothing to commit, test timeout) are
//! carried as data in `GitOutcome`, `ExecutionResult` and `FixAttempt`.

/// Autoheal structural errors.
#[derive(Debug, thiserror::Error)]
pub enum HealError {
    #[error("invalid workspace: {0}")]
    InvalidWorkspace(String),

    #[error("clone of {url} failed: {reason}")]
    CloneFailed { url: String, reason: String },

    #[error("cannot create branch {branch}: {reason}")]
    BranchCreation { branch: String, reason: String },

    #[error("invalid branch name input: {0}")]
    InvalidBranchName(String),

    #[error("branch name already assigned for this run: {0}")]
    BranchAlreadyAssigned(String),

    #[error("run already concluded as {0}")]
    RunConcluded(String),

    #[error("unknown run: {0}")]
    UnknownRun(String),

    #[error("run is still executing: {0}")]
    RunActive(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("scan failed: {0}")]
    Scan(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] autoheal_state::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for autoheal domain operations.
pub type Result<T> = std::result::Result<T, HealError>;
