//! Static analyzer: per-file defect detection without executing code.
//!
//! Checks run in order and the first two short-circuit:
//! 1. syntax (tree-sitter) → one SYNTAX defect, halt
//! 2. block layout → one INDENTATION defect, halt
//! 3. import resolution → one IMPORT defect per unresolved target
//! 4. string-concatenation heuristic → TYPE_ERROR per occurrence
//! 5. linter findings → LINTING, unless an IMPORT defect shares the line
//!
//! [`StaticAnalyzer::analyze`] is pure: all filesystem and process I/O
//! (reading files, building the [`ModuleIndex`], running the linter) happens
//! in the scanner.
//!
//! # Modules
//!
//! - [`syntax`]: tree-sitter parsing and error location
//! - [`indentation`]: Python layout checker
//! - [`imports`]: import extraction and `ModuleIndex`
//! - [`types`]: string-concatenation heuristic
//! - [`lint`]: flake8 runner and output parser
//! - [`stdlib`]: standard-library module names

pub mod imports;
pub mod indentation;
pub mod lint;
pub mod stdlib;
pub mod syntax;
pub mod types;

use std::collections::HashSet;
use std::path::Path;

pub use imports::{ImportRef, ModuleIndex, Unresolved};
pub use lint::{LintError, LintFinding};

use crate::domain::{Defect, DefectCategory, Language};

/// Which checks beyond syntax/layout are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerChecks {
    pub imports: bool,
    pub type_heuristic: bool,
}

impl Default for AnalyzerChecks {
    fn default() -> Self {
        Self {
            imports: true,
            type_heuristic: true,
        }
    }
}

/// Language of a source file, by extension. TypeScript is not analyzed.
pub fn source_language(path: &Path) -> Option<Language> {
    match path.extension()?.to_str()? {
        "py" => Some(Language::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticAnalyzer {
    checks: AnalyzerChecks,
}

impl StaticAnalyzer {
    pub fn new(checks: AnalyzerChecks) -> Self {
        Self { checks }
    }

    /// Defect for a file that could not be read. Never repaired.
    pub fn unreadable(file: &str, error: &dyn std::fmt::Display) -> Defect {
        Defect::new(
            file,
            0,
            DefectCategory::Unreadable,
            format!("Cannot read file: {error}"),
            "Skip this file; it cannot be read as UTF-8 text",
        )
    }

    /// Analyze one file. `lint` may hold findings for other files; only
    /// those matching `file` are used.
    pub fn analyze(
        &self,
        file: &str,
        content: &str,
        index: &ModuleIndex,
        lint: &[LintFinding],
    ) -> Vec<Defect> {
        let Some(language) = source_language(Path::new(file)) else {
            return Vec::new();
        };

        let tree = match syntax::parse(language, content) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(file = %file, error = %e, "parser unavailable");
                return vec![Self::unreadable(file, &e)];
            }
        };

        let syntax_issue = syntax::first_syntax_issue(&tree, content);
        let layout_issue = match language {
            Language::Python => indentation::check_layout(content),
            Language::JavaScript => None,
        };

        match (&syntax_issue, &layout_issue) {
            (syntax, Some(layout)) if syntax.as_ref().map_or(true, |s| layout.line <= s.line) => {
                return vec![Defect::new(
                    file,
                    layout.line,
                    DefectCategory::Indentation,
                    format!("IndentationError: {}", layout.message),
                    format!("Fix indentation at line {}", layout.line),
                )];
            }
            (Some(syntax), _) => {
                return vec![Defect::new(
                    file,
                    syntax.line,
                    DefectCategory::Syntax,
                    format!("SyntaxError: {}", syntax.message),
                    format!("Fix syntax at line {}: {}", syntax.line, syntax.snippet),
                )];
            }
            _ => {}
        }

        if language != Language::Python {
            return Vec::new();
        }

        let source = content.as_bytes();
        let mut defects = Vec::new();

        if self.checks.imports {
            for import in imports::extract_imports(&tree, source) {
                for unresolved in index.resolve(file, &import) {
                    defects.push(import_defect(file, import.line, unresolved));
                }
            }
        }

        if self.checks.type_heuristic {
            for c in types::suspicious_concatenations(&tree, source) {
                let description = if c.literal_first {
                    format!("TypeError: string + non-string variable '{}'", c.identifier)
                } else {
                    format!("TypeError: non-string variable '{}' + string", c.identifier)
                };
                defects.push(Defect::new(
                    file,
                    c.line,
                    DefectCategory::TypeError,
                    description,
                    format!("Wrap '{}' with str() at line {}", c.identifier, c.line),
                ));
            }
        }

        let import_lines: HashSet<u32> = defects
            .iter()
            .filter(|d| d.category == DefectCategory::Import)
            .map(|d| d.line)
            .collect();
        for finding in lint.iter().filter(|f| f.file == file) {
            if import_lines.contains(&finding.line) {
                continue;
            }
            defects.push(Defect::new(
                file,
                finding.line,
                DefectCategory::Linting,
                format!("{} {}", finding.code, finding.text),
                finding.remediation_hint(),
            ));
        }

        defects
    }
}

fn import_defect(file: &str, line: u32, unresolved: Unresolved) -> Defect {
    match unresolved {
        Unresolved::Module { name } => Defect::new(
            file,
            line,
            DefectCategory::Import,
            format!("ImportError: No module named '{name}'"),
            format!("Install '{name}' or remove the import"),
        ),
        Unresolved::Name { module, name } => Defect::new(
            file,
            line,
            DefectCategory::Import,
            format!("ImportError: cannot import name '{name}' from '{module}'"),
            format!("'{name}' does not exist in '{module}'"),
        ),
    }
}
