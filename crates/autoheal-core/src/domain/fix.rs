//! FixAttempt: one repair of one defect within one iteration.

use serde::{Deserialize, Serialize};

use super::defect::Defect;

/// Which step of a fix attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStage {
    Read,
    Repair,
    Write,
    Git,
}

/// Terminal state of a fix attempt.
///
/// A commit SHA exists only on `Applied`, so `commit_sha().is_some() ==
/// applied()` holds by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FixStatus {
    Applied { commit_sha: String },
    Failed { stage: FixStage, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub iteration: u32,
    pub defect: Defect,
    /// Replacement content, when the repair generator produced one.
    pub proposed_content: Option<String>,
    pub commit_message: String,
    pub status: FixStatus,
}

impl FixAttempt {
    pub fn applied(&self) -> bool {
        matches!(self.status, FixStatus::Applied { .. })
    }

    pub fn commit_sha(&self) -> Option<&str> {
        match &self.status {
            FixStatus::Applied { commit_sha } => Some(commit_sha),
            FixStatus::Failed { .. } => None,
        }
    }

    /// Fixes are only applied once pushed, so this mirrors `applied()`.
    pub fn push_succeeded(&self) -> bool {
        self.applied()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            FixStatus::Applied { .. } => None,
            FixStatus::Failed { reason, .. } => Some(reason),
        }
    }
}

/// Commit summary for a fix, before the provenance prefix is added.
pub fn commit_summary(defect: &Defect) -> String {
    format!(
        "Fix {} in {} line {}",
        defect.category, defect.file, defect.line
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DefectCategory;

    fn defect() -> Defect {
        Defect::new("src/app.py", 7, DefectCategory::Syntax, "bad", "fix it")
    }

    #[test]
    fn test_sha_present_iff_applied() {
        let ok = FixAttempt {
            iteration: 1,
            defect: defect(),
            proposed_content: Some("x = 1\n".to_string()),
            commit_message: commit_summary(&defect()),
            status: FixStatus::Applied {
                commit_sha: "deadbeef".to_string(),
            },
        };
        assert!(ok.applied() && ok.push_succeeded());
        assert_eq!(ok.commit_sha(), Some("deadbeef"));

        let failed = FixAttempt {
            status: FixStatus::Failed {
                stage: FixStage::Git,
                reason: "push rejected".to_string(),
            },
            ..ok
        };
        assert!(!failed.applied());
        assert!(failed.commit_sha().is_none());
        assert_eq!(failed.failure_reason(), Some("push rejected"));
    }

    #[test]
    fn test_commit_summary_format() {
        assert_eq!(commit_summary(&defect()), "Fix SYNTAX in src/app.py line 7");
    }
}
