//! String-concatenation type heuristic.
//!
//! Flags `"literal" + name` / `name + "literal"` where `name` is not known to
//! hold a string in this file.

use std::collections::HashSet;

use tree_sitter::{Node, Tree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concatenation {
    pub line: u32,
    pub identifier: String,
    /// True when the literal is on the left.
    pub literal_first: bool,
}

fn text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or_default()
}

fn is_string_literal(node: Node<'_>) -> bool {
    matches!(node.kind(), "string" | "concatenated_string")
}

fn is_str_annotation(node: Node<'_>, source: &[u8]) -> bool {
    text(node, source).trim() == "str"
}

fn is_str_call(node: Node<'_>, source: &[u8]) -> bool {
    node.kind() == "call"
        && node
            .child_by_field_name("function")
            .is_some_and(|f| text(f, source) == "str")
}

/// Identifiers this file assigns a string literal, annotates as `str`, or
/// binds to `str(...)`.
fn string_names(node: Node<'_>, source: &[u8], out: &mut HashSet<String>) {
    match node.kind() {
        "assignment" => {
            let left = node.child_by_field_name("left");
            let right = node.child_by_field_name("right");
            let annotated = node
                .child_by_field_name("type")
                .is_some_and(|t| is_str_annotation(t, source));
            let string_value =
                right.is_some_and(|r| is_string_literal(r) || is_str_call(r, source));
            if let Some(left) = left.filter(|l| l.kind() == "identifier") {
                if annotated || string_value {
                    out.insert(text(left, source).to_string());
                }
            }
        }
        "typed_parameter" | "typed_default_parameter" => {
            let annotated = node
                .child_by_field_name("type")
                .is_some_and(|t| is_str_annotation(t, source));
            if annotated {
                let name = node.child_by_field_name("name").or_else(|| {
                    let mut cursor = node.walk();
                    let first = node
                        .named_children(&mut cursor)
                        .find(|c| c.kind() == "identifier");
                    first
                });
                if let Some(name) = name {
                    out.insert(text(name, source).to_string());
                }
            }
        }
        _ => {}
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        string_names(child, source, out);
    }
}

fn find_concatenations(
    node: Node<'_>,
    source: &[u8],
    strings: &HashSet<String>,
    out: &mut Vec<Concatenation>,
) {
    if node.kind() == "binary_operator" {
        let is_add = node
            .child_by_field_name("operator")
            .is_some_and(|op| op.kind() == "+");
        if let (true, Some(left), Some(right)) = (
            is_add,
            node.child_by_field_name("left"),
            node.child_by_field_name("right"),
        ) {
            let flagged = match (is_string_literal(left), is_string_literal(right)) {
                (true, false) if right.kind() == "identifier" => Some((right, true)),
                (false, true) if left.kind() == "identifier" => Some((left, false)),
                _ => None,
            };
            if let Some((ident, literal_first)) = flagged {
                let name = text(ident, source);
                if !strings.contains(name) {
                    out.push(Concatenation {
                        line: node.start_position().row as u32 + 1,
                        identifier: name.to_string(),
                        literal_first,
                    });
                }
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        find_concatenations(child, source, strings, out);
    }
}

/// Every suspicious string concatenation, in document order.
pub fn suspicious_concatenations(tree: &Tree, source: &[u8]) -> Vec<Concatenation> {
    let mut strings = HashSet::new();
    string_names(tree.root_node(), source, &mut strings);
    let mut out = Vec::new();
    find_concatenations(tree.root_node(), source, &strings, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::syntax::parse;
    use crate::domain::Language;

    fn scan(src: &str) -> Vec<Concatenation> {
        let tree = parse(Language::Python, src).unwrap();
        suspicious_concatenations(&tree, src.as_bytes())
    }

    #[test]
    fn test_flags_literal_plus_name() {
        let found = scan("count = 3\nmsg = 'total: ' + count\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identifier, "count");
        assert_eq!(found[0].line, 2);
        assert!(found[0].literal_first);
    }

    #[test]
    fn test_known_strings_are_not_flagged() {
        let src = "name = 'bob'\nlabel: str = get()\ns = str(4)\ngreeting = 'hi ' + name\nx = label + '!'\ny = 'n=' + s\n";
        assert!(scan(src).is_empty());
    }

    #[test]
    fn test_str_parameter_not_flagged() {
        let src = "def greet(who: str):\n    return 'hello ' + who\n";
        assert!(scan(src).is_empty());
    }

    #[test]
    fn test_literal_plus_literal_and_calls_ignored() {
        assert!(scan("a = 'x' + 'y'\nb = 'x' + str(1)\nc = 1 + n\n").is_empty());
    }
}
