//! Python block-layout checker.
//!
//! tree-sitter's Python scanner recovers silently from several layout
//! mistakes the interpreter rejects, so indentation is checked separately on
//! logical lines: an indent stack, bracket depth, string state and
//! backslash continuations.

/// First indentation problem in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutIssue {
    /// 1-based.
    pub line: u32,
    pub message: &'static str,
}

pub const UNEXPECTED_INDENT: &str = "unexpected indent";
pub const UNINDENT_MISMATCH: &str = "unindent does not match any outer indentation level";
pub const EXPECTED_INDENTED_BLOCK: &str = "expected an indented block";

const TAB_WIDTH: usize = 8;

#[derive(Debug, Default)]
struct LineScanner {
    depth: usize,
    /// Open string delimiter: `'`, `"`, `'''` or `"""`.
    open_string: Option<&'static str>,
    continued: bool,
    last_significant: Option<char>,
}

impl LineScanner {
    fn in_logical_line(&self) -> bool {
        self.depth > 0 || self.continued || matches!(self.open_string, Some(d) if d.len() == 3)
    }

    /// Consume one physical line, updating bracket/string/continuation state.
    fn feed(&mut self, line: &str) {
        self.continued = false;
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if let Some(delim) = self.open_string {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if starts_with_at(&chars, i, delim) {
                    self.open_string = None;
                    self.last_significant = Some(c);
                    i += delim.len();
                    continue;
                }
                i += 1;
                continue;
            }
            match c {
                '#' => break,
                '\'' | '"' => {
                    let delim = match (c, starts_with_at(&chars, i, if c == '"' { "\"\"\"" } else { "'''" })) {
                        ('"', true) => "\"\"\"",
                        ('\'', true) => "'''",
                        ('"', false) => "\"",
                        _ => "'",
                    };
                    self.open_string = Some(delim);
                    i += delim.len();
                    continue;
                }
                '(' | '[' | '{' => self.depth += 1,
                ')' | ']' | '}' => self.depth = self.depth.saturating_sub(1),
                '\\' if i + 1 == chars.len() => {
                    self.continued = true;
                    i += 1;
                    continue;
                }
                _ => {}
            }
            if !c.is_whitespace() {
                self.last_significant = Some(c);
            }
            i += 1;
        }
        // Single-quoted strings never span lines.
        if matches!(self.open_string, Some(d) if d.len() == 1) {
            self.open_string = None;
        }
    }
}

fn starts_with_at(chars: &[char], at: usize, pat: &str) -> bool {
    let mut idx = at;
    for p in pat.chars() {
        if chars.get(idx) != Some(&p) {
            return false;
        }
        idx += 1;
    }
    true
}

fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
            '\x0c' => width = 0,
            _ => break,
        }
    }
    width
}

fn is_blank_or_comment(line: &str) -> bool {
    let t = line.trim_start();
    t.is_empty() || t.starts_with('#')
}

/// Return the first layout problem in `content`, if any.
pub fn check_layout(content: &str) -> Option<LayoutIssue> {
    let mut stack: Vec<usize> = vec![0];
    let mut scanner = LineScanner::default();
    let mut expect_indent = false;
    let mut header_line = 0u32;

    for (idx, line) in content.lines().enumerate() {
        let lineno = idx as u32 + 1;

        if scanner.in_logical_line() {
            scanner.feed(line);
        } else {
            if is_blank_or_comment(line) {
                continue;
            }
            let width = indent_width(line);
            let top = stack.last().copied().unwrap_or(0);

            if expect_indent {
                if width <= top {
                    return Some(LayoutIssue {
                        line: lineno,
                        message: EXPECTED_INDENTED_BLOCK,
                    });
                }
                stack.push(width);
                expect_indent = false;
            } else if width > top {
                return Some(LayoutIssue {
                    line: lineno,
                    message: UNEXPECTED_INDENT,
                });
            } else if width < top {
                while stack.last().is_some_and(|t| *t > width) {
                    stack.pop();
                }
                if stack.last().copied() != Some(width) {
                    return Some(LayoutIssue {
                        line: lineno,
                        message: UNINDENT_MISMATCH,
                    });
                }
            }

            scanner.last_significant = None;
            header_line = lineno;
            scanner.feed(line);
        }

        if !scanner.in_logical_line() {
            expect_indent = scanner.last_significant == Some(':');
        }
    }

    if expect_indent {
        return Some(LayoutIssue {
            line: header_line,
            message: EXPECTED_INDENTED_BLOCK,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_file() {
        let src = "\
import os

def f(x):
    if x:
        return [
            1,
  2,
        ]
    # comment at odd indent
      # another
    s = '''
text at column 0
    '''
    return s \\
        + 'x'

class A:
    pass
";
        assert_eq!(check_layout(src), None);
    }

    #[test]
    fn test_unexpected_indent() {
        let src = "x = 1\n    y = 2\n";
        assert_eq!(
            check_layout(src),
            Some(LayoutIssue {
                line: 2,
                message: UNEXPECTED_INDENT
            })
        );
    }

    #[test]
    fn test_unindent_mismatch() {
        let src = "def f():\n    if True:\n        a = 1\n      b = 2\n";
        let issue = check_layout(src).unwrap();
        assert_eq!(issue.line, 4);
        assert_eq!(issue.message, UNINDENT_MISMATCH);
    }

    #[test]
    fn test_missing_block() {
        let src = "def f():\nreturn 1\n";
        let issue = check_layout(src).unwrap();
        assert_eq!(issue.line, 2);
        assert_eq!(issue.message, EXPECTED_INDENTED_BLOCK);
    }

    #[test]
    fn test_colon_inside_string_or_dict_is_not_a_header() {
        let src = "d = {'a': 1}\nmsg = 'key:'\nx = d['a']\n";
        assert_eq!(check_layout(src), None);
    }

    #[test]
    fn test_tabs_expand_to_eight() {
        let src = "if True:\n\tx = 1\n        y = 2\n";
        assert_eq!(check_layout(src), None);
    }
}
