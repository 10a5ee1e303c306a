//! Python import extraction and resolution.
//!
//! Resolution never imports anything. A module resolves when it is part of
//! the standard library, declared as a project dependency, reported by the
//! optional interpreter probe, or present in the repository itself.

use std::collections::{HashMap, HashSet};

use tree_sitter::{Node, Tree};

use super::stdlib::is_stdlib;

/// Distribution names whose import name differs.
const DISTRIBUTION_ALIASES: &[(&str, &str)] = &[
    ("beautifulsoup4", "bs4"),
    ("pyyaml", "yaml"),
    ("pillow", "pil"),
    ("scikit-learn", "sklearn"),
    ("scikit-image", "skimage"),
    ("python-dateutil", "dateutil"),
    ("opencv-python", "cv2"),
    ("opencv-python-headless", "cv2"),
    ("attrs", "attr"),
    ("python-dotenv", "dotenv"),
    ("pyjwt", "jwt"),
    ("psycopg2-binary", "psycopg2"),
    ("pycryptodome", "crypto"),
    ("protobuf", "google"),
];

/// One `import` or `from ... import` statement target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub line: u32,
    /// Leading dots of a relative import; 0 when absolute.
    pub level: usize,
    /// Dotted module path after the dots. Empty for `from . import x`.
    pub module: String,
    /// Names pulled in by `from M import ...`.
    pub names: Vec<String>,
    pub wildcard: bool,
    pub is_from: bool,
}

impl ImportRef {
    fn display_module(&self) -> String {
        format!("{}{}", ".".repeat(self.level), self.module)
    }
}

/// Why an import does not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    Module { name: String },
    Name { module: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ModuleSymbols {
    Known(HashSet<String>),
    /// Wildcard re-exports or `__getattr__`: any name may exist.
    Unknown,
}

/// Everything an import may resolve against, built once per scan.
#[derive(Debug, Clone, Default)]
pub struct ModuleIndex {
    modules: HashMap<String, ModuleSymbols>,
    declared: HashSet<String>,
    installed: HashSet<String>,
}

fn text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or_default()
}

fn requirement_name(spec: &str) -> &str {
    let spec = spec.trim();
    let end = spec
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(spec.len());
    &spec[..end]
}

fn import_name_of(distribution: &str) -> String {
    let lower = distribution.to_ascii_lowercase().replace('_', "-");
    DISTRIBUTION_ALIASES
        .iter()
        .find(|(dist, _)| *dist == lower)
        .map(|(_, module)| module.to_string())
        .unwrap_or_else(|| lower.replace(['-', '.'], "_"))
}

impl ModuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository source file (`/`-separated, workspace-relative).
    /// `symbols` is `None` when its top-level names cannot be enumerated.
    pub fn add_source(&mut self, rel_path: &str, symbols: Option<HashSet<String>>) {
        let Some(stem) = rel_path.strip_suffix(".py") else {
            return;
        };
        let mut parts: Vec<&str> = stem.split('/').filter(|p| !p.is_empty()).collect();
        let is_package_init = parts.last() == Some(&"__init__");
        if is_package_init {
            parts.pop();
        }
        if parts.is_empty() {
            return;
        }

        let entry = symbols.map(ModuleSymbols::Known).unwrap_or(ModuleSymbols::Unknown);
        let mut spellings = vec![parts.clone()];
        if parts.len() > 1 && parts[0] == "src" {
            spellings.push(parts[1..].to_vec());
        }
        for parts in spellings {
            for len in 1..parts.len() {
                self.modules
                    .entry(parts[..len].join("."))
                    .or_insert_with(|| ModuleSymbols::Known(HashSet::new()));
            }
            self.modules.insert(parts.join("."), entry.clone());
        }
    }

    /// Declare a dependency by distribution name.
    pub fn add_declared(&mut self, distribution: &str) {
        if !distribution.is_empty() {
            self.declared.insert(import_name_of(distribution));
        }
    }

    pub fn extend_installed(&mut self, modules: impl IntoIterator<Item = String>) {
        self.installed
            .extend(modules.into_iter().map(|m| m.to_ascii_lowercase()));
    }

    /// Record dependencies listed in a `requirements*.txt` file.
    pub fn declare_from_requirements(&mut self, contents: &str) {
        for raw in contents.lines() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() || line.starts_with('-') {
                continue;
            }
            self.add_declared(requirement_name(line));
        }
    }

    /// Record dependencies listed in a `pyproject.toml` (PEP 621 and Poetry).
    pub fn declare_from_pyproject(&mut self, contents: &str) -> Result<(), toml::de::Error> {
        let doc: toml::Value = toml::from_str(contents)?;

        let mut specs: Vec<String> = Vec::new();
        if let Some(project) = doc.get("project") {
            if let Some(deps) = project.get("dependencies").and_then(|d| d.as_array()) {
                specs.extend(deps.iter().filter_map(|d| d.as_str()).map(str::to_string));
            }
            if let Some(groups) = project
                .get("optional-dependencies")
                .and_then(|d| d.as_table())
            {
                for deps in groups.values().filter_map(|g| g.as_array()) {
                    specs.extend(deps.iter().filter_map(|d| d.as_str()).map(str::to_string));
                }
            }
        }
        if let Some(poetry) = doc.get("tool").and_then(|t| t.get("poetry")) {
            let mut tables = vec![poetry.get("dependencies"), poetry.get("dev-dependencies")];
            if let Some(groups) = poetry.get("group").and_then(|g| g.as_table()) {
                tables.extend(groups.values().map(|g| g.get("dependencies")));
            }
            for table in tables.into_iter().flatten().filter_map(|t| t.as_table()) {
                specs.extend(table.keys().filter(|k| *k != "python").cloned());
            }
        }

        for spec in specs {
            self.add_declared(requirement_name(&spec));
        }
        Ok(())
    }

    pub fn contains_module(&self, dotted: &str) -> bool {
        self.modules.contains_key(dotted)
    }

    fn is_external(&self, top_level: &str) -> bool {
        let lower = top_level.to_ascii_lowercase();
        is_stdlib(top_level) || self.declared.contains(&lower) || self.installed.contains(&lower)
    }

    /// Resolve one import made by the file at `importer`.
    pub fn resolve(&self, importer: &str, import: &ImportRef) -> Vec<Unresolved> {
        let importer_dir: Vec<&str> = {
            let mut parts: Vec<&str> = importer.split('/').filter(|p| !p.is_empty()).collect();
            parts.pop();
            parts
        };

        let target = if import.level == 0 {
            let top = import.module.split('.').next().unwrap_or_default();
            if self.is_external(top) {
                return Vec::new();
            }
            let mut candidates = vec![import.module.clone()];
            if !importer_dir.is_empty() {
                candidates.push(format!("{}.{}", importer_dir.join("."), import.module));
                if importer_dir[0] == "src" && importer_dir.len() > 1 {
                    candidates.push(format!("{}.{}", importer_dir[1..].join("."), import.module));
                }
            }
            match candidates.into_iter().find(|c| self.contains_module(c)) {
                Some(found) => found,
                None => {
                    let name = if self.contains_module(top) {
                        import.module.clone()
                    } else {
                        top.to_string()
                    };
                    return vec![Unresolved::Module { name }];
                }
            }
        } else {
            let ups = import.level - 1;
            if ups > importer_dir.len() {
                return vec![Unresolved::Module {
                    name: import.display_module(),
                }];
            }
            let base = importer_dir[..importer_dir.len() - ups].join(".");
            let full = match (base.is_empty(), import.module.is_empty()) {
                (_, true) => base,
                (true, false) => import.module.clone(),
                (false, false) => format!("{base}.{}", import.module),
            };
            if !full.is_empty() && !self.contains_module(&full) {
                return vec![Unresolved::Module {
                    name: import.display_module(),
                }];
            }
            full
        };

        if !import.is_from || import.wildcard {
            return Vec::new();
        }
        import
            .names
            .iter()
            .filter(|name| !self.name_exists(&target, name))
            .map(|name| Unresolved::Name {
                module: import.display_module(),
                name: name.clone(),
            })
            .collect()
    }

    fn name_exists(&self, module: &str, name: &str) -> bool {
        let submodule = if module.is_empty() {
            name.to_string()
        } else {
            format!("{module}.{name}")
        };
        if self.contains_module(&submodule) {
            return true;
        }
        match self.modules.get(module) {
            Some(ModuleSymbols::Known(symbols)) => symbols.contains(name),
            Some(ModuleSymbols::Unknown) => true,
            // Implicit root package: only submodules are importable.
            None => false,
        }
    }
}

/// All imports in `tree` that are not guarded by a `try` statement.
pub fn extract_imports(tree: &Tree, source: &[u8]) -> Vec<ImportRef> {
    let mut out = Vec::new();
    collect_imports(tree.root_node(), source, false, &mut out);
    out
}

fn collect_imports(node: Node<'_>, source: &[u8], guarded: bool, out: &mut Vec<ImportRef>) {
    match node.kind() {
        "import_statement" => {
            if !guarded {
                out.extend(plain_imports(node, source));
            }
            return;
        }
        "import_from_statement" => {
            if !guarded {
                out.extend(from_import(node, source));
            }
            return;
        }
        _ => {}
    }
    let guarded = guarded || node.kind() == "try_statement";
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_imports(child, source, guarded, out);
    }
}

fn alias_target(node: Node<'_>) -> Option<Node<'_>> {
    if node.kind() == "aliased_import" {
        node.child_by_field_name("name")
    } else {
        Some(node)
    }
}

fn plain_imports(node: Node<'_>, source: &[u8]) -> Vec<ImportRef> {
    let line = node.start_position().row as u32 + 1;
    let mut cursor = node.walk();
    let imports = node
        .children_by_field_name("name", &mut cursor)
        .filter_map(alias_target)
        .map(|target| ImportRef {
            line,
            level: 0,
            module: text(target, source).to_string(),
            names: Vec::new(),
            wildcard: false,
            is_from: false,
        })
        .collect();
    imports
}

fn from_import(node: Node<'_>, source: &[u8]) -> Option<ImportRef> {
    let module_node = node.child_by_field_name("module_name")?;
    let (level, module) = if module_node.kind() == "relative_import" {
        let mut level = 0;
        let mut module = String::new();
        for child in module_node.children(&mut module_node.walk()) {
            match child.kind() {
                "import_prefix" => level = text(child, source).matches('.').count(),
                "dotted_name" => module = text(child, source).to_string(),
                _ => {}
            }
        }
        (level, module)
    } else {
        (0, text(module_node, source).to_string())
    };

    let mut cursor = node.walk();
    let names = node
        .children_by_field_name("name", &mut cursor)
        .filter_map(alias_target)
        .map(|n| text(n, source).to_string())
        .collect();
    let wildcard = node
        .children(&mut node.walk())
        .any(|c| c.kind() == "wildcard_import");

    Some(ImportRef {
        line: node.start_position().row as u32 + 1,
        level,
        module,
        names,
        wildcard,
        is_from: true,
    })
}

/// Names bound at module level, or `None` when they cannot be enumerated.
pub fn top_level_symbols(tree: &Tree, source: &[u8]) -> Option<HashSet<String>> {
    let mut symbols = HashSet::new();
    collect_definitions(tree.root_node(), source, &mut symbols)?;
    Some(symbols)
}

fn collect_definitions(node: Node<'_>, source: &[u8], out: &mut HashSet<String>) -> Option<()> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_definition" | "class_definition" => {
                if let Some(name) = child.child_by_field_name("name") {
                    let name = text(name, source);
                    if name == "__getattr__" {
                        return None;
                    }
                    out.insert(name.to_string());
                }
            }
            "decorated_definition" => {
                if let Some(def) = child.child_by_field_name("definition") {
                    if let Some(name) = def.child_by_field_name("name") {
                        out.insert(text(name, source).to_string());
                    }
                }
            }
            "expression_statement" => {
                let mut inner = child.walk();
                for expr in child.children(&mut inner) {
                    if matches!(expr.kind(), "assignment" | "augmented_assignment") {
                        if let Some(left) = expr.child_by_field_name("left") {
                            bound_identifiers(left, source, out);
                        }
                    }
                }
            }
            "import_statement" => {
                let mut inner = child.walk();
                for name in child.children_by_field_name("name", &mut inner) {
                    let bound = if name.kind() == "aliased_import" {
                        name.child_by_field_name("alias").map(|a| text(a, source))
                    } else {
                        text(name, source).split('.').next()
                    };
                    if let Some(bound) = bound {
                        out.insert(bound.to_string());
                    }
                }
            }
            "import_from_statement" => {
                let mut inner = child.walk();
                if child
                    .children(&mut inner)
                    .any(|c| c.kind() == "wildcard_import")
                {
                    return None;
                }
                let mut inner = child.walk();
                for name in child.children_by_field_name("name", &mut inner) {
                    let bound = if name.kind() == "aliased_import" {
                        name.child_by_field_name("alias")
                    } else {
                        Some(name)
                    };
                    if let Some(bound) = bound {
                        out.insert(text(bound, source).to_string());
                    }
                }
            }
            "if_statement" | "try_statement" | "with_statement" | "for_statement"
            | "while_statement" | "block" | "else_clause" | "elif_clause" | "except_clause"
            | "finally_clause" => {
                collect_definitions(child, source, out)?;
            }
            _ => {}
        }
    }
    Some(())
}

fn bound_identifiers(node: Node<'_>, source: &[u8], out: &mut HashSet<String>) {
    match node.kind() {
        "identifier" => {
            out.insert(text(node, source).to_string());
        }
        "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                bound_identifiers(child, source, out);
            }
        }
        _ => {}
    }
}
