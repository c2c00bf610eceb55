//! Pre-call checks on student code.
//!
//! These run before any backend call: empty code, stub/template code and
//! code that does not parse as Python are settled locally with a score of 0.
//!
//! Syntax checking uses tree-sitter and is compiled in with the
//! `python-syntax` feature. Without it every snippet is treated as parseable.

use regex::Regex;
use std::sync::LazyLock;
#[cfg(feature = "python-syntax")]
use tracing::warn;

/// Code shorter than this that mentions a placeholder marker is a stub even
/// when it also contains some real lines.
const SHORT_STUB_LEN: usize = 50;

static MARKER_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)your\s+(?:code|solution|answer)\s+(?:goes\s+)?here|^\s*todo\b|implement\s+this|write\s+your\s+code",
    )
    .expect("marker comment regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Blank,
    /// `pass`, `...` or `raise NotImplementedError`.
    Filler,
    /// A comment naming a placeholder ("# your code here", "# TODO").
    Marker,
    Comment,
    Code,
}

fn classify(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed == "pass" || trimmed == "..." || trimmed.starts_with("raise NotImplementedError") {
        return LineKind::Filler;
    }
    match trimmed.strip_prefix('#') {
        Some(comment) if MARKER_COMMENT.is_match(comment) => LineKind::Marker,
        Some(_) => LineKind::Comment,
        None => LineKind::Code,
    }
}

/// True when `code` is empty after trimming whitespace.
pub fn is_empty_code(code: &str) -> bool {
    code.trim().is_empty()
}

/// True when `code` is template content rather than an attempt.
///
/// Either every non-blank line is a stub line with at least one filler or
/// marker among them, or the snippet is short and names a placeholder.
pub fn is_placeholder(code: &str) -> bool {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return false;
    }

    let kinds: Vec<LineKind> = trimmed
        .lines()
        .map(classify)
        .filter(|k| *k != LineKind::Blank)
        .collect();
    let has_stub = kinds
        .iter()
        .any(|k| matches!(k, LineKind::Filler | LineKind::Marker));

    let only_stubs = kinds.iter().all(|k| *k != LineKind::Code);
    if only_stubs && has_stub {
        return true;
    }

    trimmed.len() < SHORT_STUB_LEN
        && (kinds.contains(&LineKind::Marker) || trimmed.contains("raise NotImplementedError"))
}

/// Blank out IPython magics (`%timeit`, `!pip install`) so that otherwise
/// valid cells are not reported as syntax errors.
fn strip_magics(code: &str) -> String {
    code.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with('%') || trimmed.starts_with('!') {
                ""
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Checks Python syntax with a reusable tree-sitter parser.
pub struct SyntaxChecker {
    #[cfg(feature = "python-syntax")]
    parser: std::sync::Mutex<Option<tree_sitter::Parser>>,
}

impl SyntaxChecker {
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "python-syntax")]
            parser: std::sync::Mutex::new(None),
        }
    }

    /// True when `code` fails to parse as Python.
    pub fn has_syntax_error(&self, code: &str) -> bool {
        #[cfg(feature = "python-syntax")]
        {
            let source = strip_magics(code);
            match self.parse(&source) {
                Some(tree) => tree.root_node().has_error(),
                None => {
                    warn!("Python parser unavailable, skipping syntax check");
                    false
                }
            }
        }

        #[cfg(not(feature = "python-syntax"))]
        {
            let _ = strip_magics(code);
            false
        }
    }

    #[cfg(feature = "python-syntax")]
    fn parse(&self, source: &str) -> Option<tree_sitter::Tree> {
        let mut guard = self.parser.lock().ok()?;
        if guard.is_none() {
            let mut parser = tree_sitter::Parser::new();
            parser
                .set_language(&tree_sitter_python::LANGUAGE.into())
                .ok()?;
            *guard = Some(parser);
        }
        guard.as_mut()?.parse(source, None)
    }
}

impl Default for SyntaxChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SyntaxChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntaxChecker")
            .field("python", &cfg!(feature = "python-syntax"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_code() {
        assert!(is_empty_code(""));
        assert!(is_empty_code("  \n\t "));
        assert!(!is_empty_code("x = 1"));
    }

    #[test]
    fn test_placeholder_filler_only() {
        assert!(is_placeholder("pass"));
        assert!(is_placeholder("..."));
        assert!(is_placeholder("raise NotImplementedError()"));
    }

    #[test]
    fn test_placeholder_marker_comments() {
        assert!(is_placeholder("# Your code here"));
        assert!(is_placeholder("# YOUR SOLUTION HERE\npass"));
        assert!(is_placeholder("# TODO"));
        assert!(is_placeholder("def solve():\n    # TODO\n    pass"));
    }

    #[test]
    fn test_real_code_is_not_placeholder() {
        assert!(!is_placeholder("total = sum(range(10))\nprint(total)"));
        assert!(!is_placeholder("# compute the sum\ntotal = 0\nfor i in range(10):\n    total += i"));
        assert!(!is_placeholder("# just a note about the approach"));
    }

    #[test]
    fn test_long_solution_with_todo_is_not_placeholder() {
        let code = "def mean(values):\n    # TODO: handle empty input better\n    return sum(values) / len(values)\n";
        assert!(code.trim().len() >= SHORT_STUB_LEN);
        assert!(!is_placeholder(code));
    }

    #[test]
    fn test_strip_magics() {
        let code = "%matplotlib inline\n!pip install numpy\nimport numpy as np";
        assert_eq!(strip_magics(code), "\n\nimport numpy as np");
    }

    #[cfg(feature = "python-syntax")]
    #[test]
    fn test_syntax_error_detected() {
        let checker = SyntaxChecker::new();
        assert!(checker.has_syntax_error("def f(:\n    return 1"));
        assert!(checker.has_syntax_error("print('unterminated"));
    }

    #[cfg(feature = "python-syntax")]
    #[test]
    fn test_valid_python_passes() {
        let checker = SyntaxChecker::new();
        assert!(!checker.has_syntax_error("def f(x):\n    return x * 2\n\nprint(f(3))"));
        assert!(!checker.has_syntax_error("%timeit sum(range(100))\nvalues = [1, 2, 3]"));
    }
}
