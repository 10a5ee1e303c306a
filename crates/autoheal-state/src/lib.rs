//! autoheal-state: run bookkeeping for the healing pipeline
//!
//! ## Layer 0 - Data/Persistence
//!
//! Holds the per-run record a caller polls while a healing run is in
//! flight: lifecycle phase, iteration, the append-only fix ledger, and the
//! final summary. Also provides `ContentDigest`, used to seal persisted
//! run reports.
//!
//! ## Key Components
//!
//! - `RunStore`: backend-agnostic async bookkeeping trait
//! - `MemoryRunStore`: in-process implementation

mod error;
pub mod memory;
pub mod storage_traits;

pub use error::StorageError;
pub use memory::MemoryRunStore;
pub use storage_traits::{
    ContentDigest, FixRecord, RecordStatus, RunId, RunMetadata, RunPhase, RunProgress, RunRecord,
    RunStore, RunSummary, StorageResult,
};
