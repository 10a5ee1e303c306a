//! Parsing and syntax-error location via tree-sitter.

use tree_sitter::{Node, Parser, Tree};

use crate::domain::Language;

/// First syntax problem in a parsed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    /// 1-based.
    pub line: u32,
    pub message: String,
    /// Source text of the offending line, trimmed.
    pub snippet: String,
}

/// Parse `content` with the grammar for `language`.
pub fn parse(language: Language, content: &str) -> Result<Tree, String> {
    let mut parser = Parser::new();
    let grammar: tree_sitter::Language = match language {
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
    };
    parser
        .set_language(&grammar)
        .map_err(|e| format!("failed to load {language} grammar: {e}"))?;
    parser
        .parse(content, None)
        .ok_or_else(|| format!("{language} parser produced no tree"))
}

/// Locate the first ERROR or MISSING node in document order.
pub fn first_syntax_issue(tree: &Tree, content: &str) -> Option<SyntaxIssue> {
    let root = tree.root_node();
    if !root.has_error() {
        return None;
    }
    let Some(node) = find_first_error(root) else {
        return Some(SyntaxIssue {
            line: 0,
            message: "invalid syntax".to_string(),
            snippet: String::new(),
        });
    };

    let row = node.start_position().row;
    let message = if node.is_missing() {
        format!("expected '{}'", node.kind())
    } else {
        "invalid syntax".to_string()
    };
    Some(SyntaxIssue {
        line: row as u32 + 1,
        message,
        snippet: content
            .lines()
            .nth(row)
            .map(|l| l.trim().to_string())
            .unwrap_or_default(),
    })
}

fn find_first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = find_first_error(child) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_python_has_no_issue() {
        let src = "def f(x):\n    return x + 1\n";
        let tree = parse(Language::Python, src).unwrap();
        assert!(first_syntax_issue(&tree, src).is_none());
    }

    #[test]
    fn test_broken_python_reports_line() {
        let src = "x = 1\ny = (2 +\nprint(x\n";
        let tree = parse(Language::Python, src).unwrap();
        let issue = first_syntax_issue(&tree, src).unwrap();
        assert!(issue.line >= 2, "got line {}", issue.line);
    }

    #[test]
    fn test_broken_javascript_reports_issue() {
        let src = "function f( {\n  return 1;\n}\n";
        let tree = parse(Language::JavaScript, src).unwrap();
        assert!(first_syntax_issue(&tree, src).is_some());
    }

    #[test]
    fn test_valid_javascript() {
        let src = "const add = (a, b) => a + b;\nmodule.exports = { add };\n";
        let tree = parse(Language::JavaScript, src).unwrap();
        assert!(first_syntax_issue(&tree, src).is_none());
    }
}
