//! Storage trait definitions for autoheal run bookkeeping.
//!
//! The healing core treats bookkeeping as an opaque record store:
//! - `RunStore`: create a run, append fix records, track progress, finish,
//!   and evict finished runs after a retention window.
//!
//! All traits are async and backend-agnostic. An in-memory implementation is
//! provided in the `memory` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RunStore: healing run bookkeeping
// ---------------------------------------------------------------------------

/// Unique identifier for a healing run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

/// Metadata attached to a run at creation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Remote repository URL being healed
    pub repository: String,
    /// Team name used for the fix branch
    pub team: String,
    /// Team leader name used for the fix branch
    pub leader: String,
    /// Arbitrary key-value tags
    #[serde(default)]
    pub tags: serde_json::Value,
}

/// Coarse lifecycle phase, for progress polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Queued,
    Preparing,
    Scanning,
    Repairing,
    Verifying,
    Finished,
}

/// Terminal-or-not status of a bookkept run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Running,
    Passed,
    Failed,
}

impl RecordStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RecordStatus::Running)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::Running => write!(f, "running"),
            RecordStatus::Passed => write!(f, "passed"),
            RecordStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One attempted fix, as bookkept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub iteration: u32,
    pub file: String,
    pub category: String,
    pub line: u32,
    pub commit_message: String,
    pub applied: bool,
    pub commit_sha: Option<String>,
    pub failure_reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Summary produced when a run finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RecordStatus,
    pub iterations_used: u32,
    pub branch: Option<String>,
    pub failure_reason: Option<String>,
    /// Path of the persisted run report, when one was written
    pub report_path: Option<String>,
}

/// Full run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub metadata: RunMetadata,
    pub status: RecordStatus,
    pub phase: RunPhase,
    pub iteration: u32,
    pub summary: Option<RunSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Snapshot returned to pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub record: RunRecord,
    pub fixes: Vec<FixRecord>,
}

impl RunProgress {
    pub fn fixes_applied(&self) -> usize {
        self.fixes.iter().filter(|f| f.applied).count()
    }

    pub fn fixes_failed(&self) -> usize {
        self.fixes.iter().filter(|f| !f.applied).count()
    }
}

/// Run bookkeeping store.
///
/// Guarantees:
/// - Fix records are append-only and returned in insertion order.
/// - A run transitions: Running → Passed | Failed (terminal).
/// - Finished runs reject further phase updates and fix appends.
/// - Eviction only ever removes finished runs.
/// - Only a finished run can be reopened; reopening clears its fix ledger.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Register a run under a caller-generated id.
    async fn create_run(&self, run_id: &RunId, metadata: RunMetadata) -> StorageResult<()>;

    /// Restart a finished run under its existing id: status back to
    /// `Running`, phase `Queued`, fix ledger cleared.
    async fn reopen_run(&self, run_id: &RunId, metadata: RunMetadata) -> StorageResult<()>;

    /// Record the current phase and iteration of an active run.
    async fn update_phase(&self, run_id: &RunId, phase: RunPhase, iteration: u32)
        -> StorageResult<()>;

    /// Append one fix record to an active run.
    async fn append_fix(&self, run_id: &RunId, fix: FixRecord) -> StorageResult<()>;

    /// Mark a run finished. The summary status must be terminal.
    async fn finish_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Read the current record and fix list.
    async fn read_progress(&self, run_id: &RunId) -> StorageResult<RunProgress>;

    /// Drop finished runs completed strictly before `cutoff`. Returns the count removed.
    async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_digest_is_sha256_hex() {
        let d = ContentDigest::from_bytes(b"hello");
        assert_eq!(d.as_str().len(), 64);
        assert_eq!(d.short().len(), 12);
        assert!(ContentDigest::try_from(d.as_str().to_string()).is_ok());
    }

    #[test]
    fn test_content_digest_rejects_garbage() {
        let err = ContentDigest::try_from("xyz".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_record_status_terminal() {
        assert!(!RecordStatus::Running.is_terminal());
        assert!(RecordStatus::Passed.is_terminal());
        assert!(RecordStatus::Failed.is_terminal());
    }
}
