//! Full-repository scan: static analysis plus test execution.
//!
//! A scan never mutates the workspace. Per-file read failures become
//! UNREADABLE defects; missing tooling becomes a [`Degradation`]. Only an
//! unreadable workspace root is an error.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use walkdir::WalkDir;

use crate::analyzer::lint::{run_flake8, LintError, LintFinding};
use crate::analyzer::{
    imports, source_language, syntax, AnalyzerChecks, ModuleIndex, StaticAnalyzer,
};
use crate::classifier::classify;
use crate::domain::{
    Defect, DefectCategory, Degradation, ExecutionMode, ExecutionResult, HealError, Language,
    Result, ScanReport, TestVerdict,
};
use crate::sandbox::TestExecutor;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    "node_modules",
    "venv",
    ".venv",
    "env",
    "__pycache__",
    ".tox",
    ".nox",
    ".mypy_cache",
    ".pytest_cache",
    "site-packages",
    "dist",
    "build",
];

/// Prints every importable top-level module name for the local interpreter.
const MODULE_PROBE: &str = "import pkgutil, sys\nnames = {m.name for m in pkgutil.iter_modules()} | set(sys.builtin_module_names)\nprint('\\n'.join(sorted(names)))";

/// Static-analysis and test settings for a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub imports: bool,
    pub type_heuristic: bool,
    pub lint: bool,
    pub lint_timeout_secs: u64,
    /// Ask the local interpreter which modules are installed.
    pub probe_installed_modules: bool,
    pub probe_timeout_secs: u64,
    pub run_tests: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            imports: true,
            type_heuristic: true,
            lint: true,
            lint_timeout_secs: 30,
            probe_installed_modules: false,
            probe_timeout_secs: 10,
            run_tests: true,
        }
    }
}

impl AnalyzerConfig {
    pub fn checks(&self) -> AnalyzerChecks {
        AnalyzerChecks {
            imports: self.imports,
            type_heuristic: self.type_heuristic,
        }
    }
}

/// Produces a fresh [`ScanReport`] for a workspace.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, workspace: &Path) -> Result<ScanReport>;
}

// ---------------------------------------------------------------------------
// Source discovery
// ---------------------------------------------------------------------------

/// Files found in a workspace, as sorted `/`-separated relative paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInventory {
    /// Non-test sources in a supported language.
    pub sources: Vec<String>,
    pub test_files: Vec<String>,
    /// `requirements*.txt` files.
    pub requirements: Vec<String>,
    pub has_pyproject: bool,
}

impl SourceInventory {
    /// Languages whose test suites should run.
    pub fn test_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self
            .test_files
            .iter()
            .filter_map(|f| source_language(Path::new(f)))
            .collect();
        languages.sort_by_key(|l| l.as_str());
        languages.dedup();
        languages
    }

    pub fn python_sources(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|f| source_language(Path::new(f)) == Some(Language::Python))
            .cloned()
            .collect()
    }
}

/// Whether `file_name` is a test file by naming convention.
pub fn is_test_file(file_name: &str) -> bool {
    if file_name.ends_with(".py") {
        return file_name.starts_with("test_") || file_name.ends_with("_test.py");
    }
    [".test.", ".spec."].iter().any(|marker| {
        file_name.contains(marker) && source_language(Path::new(file_name)).is_some()
    })
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Walk `root`, skipping vendored and tooling directories.
pub fn discover(root: &Path) -> Result<SourceInventory> {
    if !root.is_dir() {
        return Err(HealError::InvalidWorkspace(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut inventory = SourceInventory::default();
    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        e.depth() == 0 || !(e.file_type().is_dir() && SKIPPED_DIRS.iter().any(|d| *d == name))
    }) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative_path(root, entry.path()) else {
            continue;
        };
        let name = entry.file_name().to_string_lossy();

        if name == "pyproject.toml" && entry.depth() == 1 {
            inventory.has_pyproject = true;
        } else if name.starts_with("requirements") && name.ends_with(".txt") {
            inventory.requirements.push(rel);
        } else if source_language(entry.path()).is_some() {
            if is_test_file(&name) {
                inventory.test_files.push(rel);
            } else {
                inventory.sources.push(rel);
            }
        }
    }

    inventory.sources.sort();
    inventory.test_files.sort();
    inventory.requirements.sort();
    Ok(inventory)
}

// ---------------------------------------------------------------------------
// Test results → defects
// ---------------------------------------------------------------------------

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

/// Convert one test execution into defects and degradations.
pub fn defects_from_execution(result: &ExecutionResult) -> (Vec<Defect>, Vec<Degradation>) {
    let mut degradations = Vec::new();
    if result.mode == ExecutionMode::Direct {
        degradations.push(Degradation::SandboxUnavailable);
    }

    let defects = match &result.verdict {
        TestVerdict::Passed => Vec::new(),
        TestVerdict::TimedOut { after_secs } => vec![Defect::new(
            Defect::UNKNOWN_FILE,
            0,
            DefectCategory::Logic,
            format!("Test execution timed out after {after_secs}s"),
            "Reduce test runtime or raise the sandbox timeout",
        )],
        TestVerdict::NoTestsDiscoverable { runner_missing, .. } => {
            degradations.push(if *runner_missing {
                Degradation::TestRunnerMissing {
                    language: result.language,
                }
            } else {
                Degradation::NoTestsDiscoverable {
                    language: result.language,
                }
            });
            Vec::new()
        }
        TestVerdict::Failed { failures } => failures
            .iter()
            .map(|failure| {
                let classification = classify(&failure.message, Some(failure.line));
                Defect::new(
                    failure.file.clone(),
                    classification.line,
                    classification.category,
                    format!("{}: {}", failure.test_name, first_line(&failure.message)),
                    format!("Make test '{}' pass", failure.test_name),
                )
            })
            .collect(),
    };
    (defects, degradations)
}

// ---------------------------------------------------------------------------
// RepositoryScanner
// ---------------------------------------------------------------------------

/// Scanner over a local working tree.
pub struct RepositoryScanner {
    config: AnalyzerConfig,
    analyzer: StaticAnalyzer,
    executor: Arc<dyn TestExecutor>,
}

impl RepositoryScanner {
    pub fn new(config: AnalyzerConfig, executor: Arc<dyn TestExecutor>) -> Self {
        let analyzer = StaticAnalyzer::new(config.checks());
        Self {
            config,
            analyzer,
            executor,
        }
    }

    /// Index of every module an import may legitimately resolve to.
    async fn build_index(
        &self,
        root: &Path,
        inventory: &SourceInventory,
        contents: &[(String, std::io::Result<String>)],
        degradations: &mut Vec<Degradation>,
    ) -> ModuleIndex {
        let mut index = ModuleIndex::new();

        for (file, content) in contents {
            if source_language(Path::new(file)) != Some(Language::Python) {
                continue;
            }
            let symbols = content.as_ref().ok().and_then(|text| {
                syntax::parse(Language::Python, text)
                    .ok()
                    .and_then(|tree| imports::top_level_symbols(&tree, text.as_bytes()))
            });
            index.add_source(file, symbols);
        }
        // Test modules and conftest helpers are importable too.
        for file in &inventory.test_files {
            if source_language(Path::new(file)) == Some(Language::Python) {
                index.add_source(file, None);
            }
        }

        for requirements in &inventory.requirements {
            match tokio::fs::read_to_string(root.join(requirements)).await {
                Ok(text) => index.declare_from_requirements(&text),
                Err(e) => tracing::debug!(file = %requirements, error = %e, "requirements unreadable"),
            }
        }
        if inventory.has_pyproject {
            let parsed = tokio::fs::read_to_string(root.join("pyproject.toml"))
                .await
                .map_err(|e| e.to_string())
                .and_then(|text| index.declare_from_pyproject(&text).map_err(|e| e.to_string()));
            if let Err(e) = parsed {
                tracing::warn!(error = %e, "pyproject.toml not usable for dependency declarations");
            }
        }

        if self.config.probe_installed_modules {
            match probe_installed_modules(Duration::from_secs(self.config.probe_timeout_secs)).await
            {
                Some(modules) => index.extend_installed(modules),
                None => degradations.push(Degradation::InterpreterProbeUnavailable),
            }
        }
        index
    }

    async fn lint(
        &self,
        root: &Path,
        inventory: &SourceInventory,
        degradations: &mut Vec<Degradation>,
    ) -> Vec<LintFinding> {
        if !self.config.lint {
            return Vec::new();
        }
        let files = inventory.python_sources();
        let timeout = Duration::from_secs(self.config.lint_timeout_secs);
        match run_flake8(root, &files, timeout).await {
            Ok(findings) => findings,
            Err(e) => {
                if !matches!(e, LintError::Unavailable(_)) {
                    tracing::warn!(error = %e, "linter run failed");
                }
                degradations.push(Degradation::LinterUnavailable {
                    detail: e.to_string(),
                });
                Vec::new()
            }
        }
    }
}

async fn probe_installed_modules(timeout: Duration) -> Option<Vec<String>> {
    let child = Command::new("python3")
        .args(["-c", MODULE_PROBE])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .ok()?;
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .ok()?
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
    )
}

#[async_trait]
impl Scanner for RepositoryScanner {
    async fn scan(&self, workspace: &Path) -> Result<ScanReport> {
        let root: PathBuf = workspace.to_path_buf();
        let inventory = discover(&root)?;
        let mut degradations = Vec::new();

        let reads = inventory.sources.iter().map(|file| {
            let path = root.join(file);
            async move {
                let content = tokio::fs::read(&path).await.and_then(|bytes| {
                    String::from_utf8(bytes)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                });
                (file.clone(), content)
            }
        });
        let contents: Vec<(String, std::io::Result<String>)> =
            futures::future::join_all(reads).await;

        let index = self
            .build_index(&root, &inventory, &contents, &mut degradations)
            .await;
        let lint = self.lint(&root, &inventory, &mut degradations).await;

        let analyzer = self.analyzer.clone();
        let mut defects = tokio::task::spawn_blocking(move || {
            let mut defects = Vec::new();
            for (file, content) in &contents {
                match content {
                    Ok(text) => defects.extend(analyzer.analyze(file, text, &index, &lint)),
                    Err(e) => defects.push(StaticAnalyzer::unreadable(file, e)),
                }
            }
            defects
        })
        .await
        .map_err(|e| HealError::Scan(format!("analyzer task failed: {e}")))?;

        if self.config.run_tests {
            for language in inventory.test_languages() {
                let result = self.executor.run(&root, language).await;
                tracing::debug!(
                    language = %language,
                    exit_code = result.exit_code,
                    duration_ms = result.duration_ms,
                    "test suite executed"
                );
                let (test_defects, test_degradations) = defects_from_execution(&result);
                defects.extend(test_defects);
                degradations.extend(test_degradations);
            }
        }

        Ok(ScanReport::new(root, defects, degradations))
    }
}
