//! Defect classifier.
//!
//! Normalizes raw analyzer / test-runner text into a canonical
//! [`DefectCategory`] plus a best-effort line number. Patterns are matched
//! case-insensitively in fixed precedence order; the first category with a
//! matching pattern wins and unmatched text is `LOGIC`.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use crate::domain::DefectCategory;

/// Category patterns in precedence order.
const CATEGORY_PATTERNS: &[(DefectCategory, &[&str])] = &[
    (
        DefectCategory::Syntax,
        &[
            r"SyntaxError",
            r"invalid syntax",
            r"unexpected token",
            r"ParseError",
        ],
    ),
    (
        DefectCategory::TypeError,
        &[
            r"TypeError",
            r"type error",
            r"cannot read propert",
            r"is not a function",
        ],
    ),
    (
        DefectCategory::Import,
        &[
            r"ImportError",
            r"ModuleNotFoundError",
            r"Cannot find module",
            r"No module named",
        ],
    ),
    (
        DefectCategory::Indentation,
        &[
            r"IndentationError",
            r"unexpected indent",
            r"unindent does not match",
        ],
    ),
    (
        DefectCategory::Linting,
        &[
            r"unused import",
            r"undefined variable",
            r"\bW\d{4}\b",
            r"\bE\d{4}\b",
            r"\bF\d{3}\b",
        ],
    ),
    (
        DefectCategory::Logic,
        &[r"AssertionError", r"assert", r"Expected.*received", r"FAILED"],
    ),
];

/// Line-number conventions, tried in this order.
const LINE_PATTERNS: &[&str] = &[r"line (\d+)", r":(\d+):", r", line (\d+)", r"Line (\d+)"];

fn category_regexes() -> &'static [(DefectCategory, Vec<Regex>)] {
    static COMPILED: OnceLock<Vec<(DefectCategory, Vec<Regex>)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        CATEGORY_PATTERNS
            .iter()
            .map(|(category, patterns)| {
                let regexes = patterns
                    .iter()
                    .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
                    .collect();
                (*category, regexes)
            })
            .collect()
    })
}

fn line_regexes() -> &'static [Regex] {
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    COMPILED.get_or_init(|| LINE_PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect())
}

/// Category and location recovered from raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: DefectCategory,
    /// 0 = unknown location.
    pub line: u32,
}

/// Classify `raw_text`. A non-zero `line_hint` takes priority over any line
/// number found in the text.
pub fn classify(raw_text: &str, line_hint: Option<u32>) -> Classification {
    let line = match line_hint {
        Some(n) if n > 0 => n,
        _ => extract_line(raw_text),
    };
    Classification {
        category: category_of(raw_text),
        line,
    }
}

/// Category for `raw_text`; `LOGIC` when nothing matches.
pub fn category_of(raw_text: &str) -> DefectCategory {
    category_regexes()
        .iter()
        .find(|(_, regexes)| regexes.iter().any(|re| re.is_match(raw_text)))
        .map(|(category, _)| *category)
        .unwrap_or(DefectCategory::Logic)
}

/// First line number found in `raw_text`, or 0.
pub fn extract_line(raw_text: &str) -> u32 {
    line_regexes()
        .iter()
        .find_map(|re| {
            re.captures(raw_text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_syntax_beats_type_error() {
        let text = "TypeError raised while reporting SyntaxError: invalid syntax";
        assert_eq!(category_of(text), DefectCategory::Syntax);
    }

    #[test]
    fn test_import_beats_indentation_and_logic() {
        let text = "FAILED tests/test_app.py::test_x - ModuleNotFoundError: No module named 'foo'";
        assert_eq!(category_of(text), DefectCategory::Import);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(category_of("indentationerror: oops"), DefectCategory::Indentation);
        assert_eq!(category_of("x is NOT A FUNCTION"), DefectCategory::TypeError);
    }

    #[test]
    fn test_lint_codes() {
        assert_eq!(
            category_of("F401 'os' imported but unused"),
            DefectCategory::Linting
        );
        assert_eq!(category_of("E1101 no member"), DefectCategory::Linting);
    }

    #[test]
    fn test_unmatched_defaults_to_logic() {
        assert_eq!(category_of("something odd happened"), DefectCategory::Logic);
        assert_eq!(category_of(""), DefectCategory::Logic);
    }

    #[test]
    fn test_assertion_is_logic() {
        assert_eq!(
            category_of("AssertionError: assert 1 == 2"),
            DefectCategory::Logic
        );
        assert_eq!(
            category_of("Expected: 3, Received: 4"),
            DefectCategory::Logic
        );
    }

    #[test]
    fn test_extract_line_conventions() {
        assert_eq!(extract_line(r#"File "a.py", line 12, in f"#), 12);
        assert_eq!(extract_line("src/app.py:33: AssertionError"), 33);
        assert_eq!(extract_line("Error at Line 9"), 9);
        assert_eq!(extract_line("no location"), 0);
    }

    #[test]
    fn test_line_priority_order() {
        // "line N" is tried before ":N:".
        assert_eq!(extract_line("a.py:5: failure at line 7"), 7);
    }

    #[test]
    fn test_hint_overrides_text() {
        let c = classify("SyntaxError at line 3", Some(10));
        assert_eq!(c.category, DefectCategory::Syntax);
        assert_eq!(c.line, 10);

        let c = classify("SyntaxError at line 3", Some(0));
        assert_eq!(c.line, 3);
    }
}
