//! Defect: a single located, categorized problem in source code.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical defect categories.
///
/// Unrecognized category strings coerce to `Logic`. `Unreadable` marks files
/// the analyzer could not read; it is reported but never repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DefectCategory {
    Syntax,
    Indentation,
    Import,
    TypeError,
    Linting,
    Logic,
    Unreadable,
}

impl DefectCategory {
    /// The six categories the repair loop acts on, in classifier precedence order.
    pub const REPAIRABLE: [DefectCategory; 6] = [
        DefectCategory::Syntax,
        DefectCategory::TypeError,
        DefectCategory::Import,
        DefectCategory::Indentation,
        DefectCategory::Linting,
        DefectCategory::Logic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DefectCategory::Syntax => "SYNTAX",
            DefectCategory::Indentation => "INDENTATION",
            DefectCategory::Import => "IMPORT",
            DefectCategory::TypeError => "TYPE_ERROR",
            DefectCategory::Linting => "LINTING",
            DefectCategory::Logic => "LOGIC",
            DefectCategory::Unreadable => "UNREADABLE",
        }
    }

    pub fn is_repairable(self) -> bool {
        !matches!(self, DefectCategory::Unreadable)
    }
}

impl fmt::Display for DefectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefectCategory {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let category = match s.trim().to_ascii_uppercase().as_str() {
            "SYNTAX" => DefectCategory::Syntax,
            "INDENTATION" => DefectCategory::Indentation,
            "IMPORT" => DefectCategory::Import,
            "TYPE_ERROR" => DefectCategory::TypeError,
            "LINTING" => DefectCategory::Linting,
            "UNREADABLE" => DefectCategory::Unreadable,
            _ => DefectCategory::Logic,
        };
        Ok(category)
    }
}

impl From<String> for DefectCategory {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(category) => category,
            Err(never) => match never {},
        }
    }
}

impl From<DefectCategory> for String {
    fn from(c: DefectCategory) -> Self {
        c.as_str().to_string()
    }
}

/// A single located, categorized problem. Line 0 means "unknown location".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    /// Path relative to the workspace root, `/`-separated.
    pub file: String,
    pub line: u32,
    pub category: DefectCategory,
    pub description: String,
    pub remediation_hint: String,
}

impl Defect {
    /// Placeholder file for defects that cannot be attributed to a source file.
    pub const UNKNOWN_FILE: &'static str = "unknown";

    pub fn new(
        file: impl Into<String>,
        line: u32,
        category: DefectCategory,
        description: impl Into<String>,
        remediation_hint: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            category,
            description: description.into(),
            remediation_hint: remediation_hint.into(),
        }
    }

    /// Whether the repair loop can act on this defect.
    pub fn is_actionable(&self) -> bool {
        self.category.is_repairable()
            && self.file != Self::UNKNOWN_FILE
            && Self::is_workspace_relative(&self.file)
    }

    /// `file` is a non-empty relative path with no root, prefix or `..`
    /// component, so joining it onto the workspace stays inside it.
    pub fn is_workspace_relative(file: &str) -> bool {
        !file.is_empty()
            && Path::new(file)
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    }
}

/// Per-category defect counts. All six repairable categories are always
/// present; `UNREADABLE` appears only when non-zero.
pub type CategoryHistogram = BTreeMap<DefectCategory, usize>;

pub(crate) fn histogram_of(defects: &[Defect]) -> CategoryHistogram {
    let mut histogram: CategoryHistogram = DefectCategory::REPAIRABLE
        .iter()
        .map(|c| (*c, 0))
        .collect();
    for defect in defects {
        *histogram.entry(defect.category).or_insert(0) += 1;
    }
    histogram
}
