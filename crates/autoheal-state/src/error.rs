//! Error types for autoheal-state

use thiserror::Error;

/// Errors produced by run bookkeeping stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No run is registered under this id
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// A run with this id was already created
    #[error("run already exists: {run_id}")]
    DuplicateRun { run_id: String },

    /// Mutation attempted on a run that is already finished
    #[error("run {run_id} is {status} and cannot be modified")]
    InvalidRunState { run_id: String, status: String },

    /// Digest string is not 64 lowercase hex characters
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::RunNotFound {
            run_id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "run not found: abc");

        let err = StorageError::InvalidRunState {
            run_id: "abc".to_string(),
            status: "passed".to_string(),
        };
        assert!(err.to_string().contains("cannot be modified"));
    }
}
