//! ScanReport and degraded-mode records.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::defect::{histogram_of, CategoryHistogram, Defect};
use super::execution::Language;

/// A condition that reduced how thoroughly a scan could search for defects.
///
/// Not an error: the scan continues, but consumers must be able to tell
/// "no defects found" apart from "defects could not be searched for".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// Container runtime absent; tests ran directly on the host.
    SandboxUnavailable,
    /// The external linter could not be run.
    LinterUnavailable { detail: String },
    /// No test runner for this language was found.
    TestRunnerMissing { language: Language },
    /// The runner found nothing to execute.
    NoTestsDiscoverable { language: Language },
    /// Installed-module probe failed; import resolution used static sources only.
    InterpreterProbeUnavailable,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::SandboxUnavailable => {
                write!(f, "sandbox runtime unavailable; tests executed unsandboxed")
            }
            Degradation::LinterUnavailable { detail } => {
                write!(f, "linter unavailable: {detail}")
            }
            Degradation::TestRunnerMissing { language } => {
                write!(f, "{language} test runner missing")
            }
            Degradation::NoTestsDiscoverable { language } => {
                write!(f, "no {language} tests discoverable")
            }
            Degradation::InterpreterProbeUnavailable => {
                write!(f, "interpreter module probe unavailable")
            }
        }
    }
}

/// Result of one full repository scan. Produced fresh each iteration.
///
/// Fields are private so `total_defect_count == defects.len() ==
/// sum(category_histogram)` holds for every instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    source_root: PathBuf,
    total_defect_count: usize,
    category_histogram: CategoryHistogram,
    defects: Vec<Defect>,
    degradations: Vec<Degradation>,
}

impl ScanReport {
    pub fn new(
        source_root: impl Into<PathBuf>,
        defects: Vec<Defect>,
        mut degradations: Vec<Degradation>,
    ) -> Self {
        let mut seen = std::collections::HashSet::new();
        degradations.retain(|d| seen.insert(d.clone()));
        Self {
            source_root: source_root.into(),
            total_defect_count: defects.len(),
            category_histogram: histogram_of(&defects),
            defects,
            degradations,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn total_defect_count(&self) -> usize {
        self.total_defect_count
    }

    pub fn category_histogram(&self) -> &CategoryHistogram {
        &self.category_histogram
    }

    pub fn defects(&self) -> &[Defect] {
        &self.defects
    }

    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    pub fn is_clean(&self) -> bool {
        self.total_defect_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DefectCategory;

    #[test]
    fn test_counts_agree() {
        let report = ScanReport::new(
            "/tmp/ws",
            vec![
                Defect::new("a.py", 1, DefectCategory::Syntax, "d", "h"),
                Defect::new("b.py", 0, DefectCategory::Unreadable, "d", "h"),
                Defect::new("c.py", 4, DefectCategory::Import, "d", "h"),
            ],
            vec![],
        );
        let sum: usize = report.category_histogram().values().sum();
        assert_eq!(report.total_defect_count(), 3);
        assert_eq!(report.defects().len(), 3);
        assert_eq!(sum, 3);
    }

    #[test]
    fn test_degradations_are_deduplicated() {
        let report = ScanReport::new(
            "/tmp/ws",
            vec![],
            vec![Degradation::SandboxUnavailable, Degradation::SandboxUnavailable],
        );
        assert!(report.is_clean());
        assert_eq!(report.degradations().len(), 1);
    }
}
