//! Parsing of heterogeneous tool output into a unified failure list.
//!
//! Three independent parsers (flake8-style lint, pytest traceback blocks,
//! mypy type errors) each yield raw `(file, line, code, description)` tuples.
//! Their outputs are concatenated lint-first, then test-failure, then
//! type-checker, and deduplicated by `(file, line)` keeping the earliest
//! entry. That ordering is a deliberate tie-break policy: the lint parser is
//! the highest-priority source for any given location.

use std::collections::HashSet;

use regex::Regex;

use crate::core::types::{BugType, Failure};

/// Map a lint code (and fallback message text) to a bug category.
///
/// Fixed prefix rules: `F401/F811/F821/E401 → IMPORT`, `E999 → SYNTAX`,
/// `E1xx → INDENTATION`, any other `E/W/F` code → LINTING. When no code is
/// present the message text decides, defaulting to LINTING.
pub fn classify_bug_type(code: &str, message: &str) -> BugType {
    let code = code.trim().to_uppercase();
    match code.as_str() {
        "F401" | "F811" | "F821" | "E401" => return BugType::Import,
        "E999" => return BugType::Syntax,
        _ => {}
    }
    if code.starts_with("E1") {
        return BugType::Indentation;
    }
    if code.starts_with('E') || code.starts_with('W') || code.starts_with('F') {
        return BugType::Linting;
    }

    let lower = message.to_lowercase();
    if lower.contains("syntax") {
        BugType::Syntax
    } else if lower.contains("indent") {
        BugType::Indentation
    } else if lower.contains("import") {
        BugType::Import
    } else {
        BugType::Linting
    }
}

/// Raw parser output before bug-type classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIssue {
    pub file: String,
    pub line: usize,
    /// Tool code, or the fixed markers `LOGIC` / `TYPE_ERROR`.
    pub code: String,
    pub description: String,
}

fn normalize_path(raw: &str) -> String {
    raw.replace('\\', "/")
        .trim_start_matches("./")
        .trim_start_matches('/')
        .trim()
        .to_string()
}

/// Parse flake8-style `file.py:line:col: CODE message` output.
pub fn parse_lint_output(output: &str) -> Vec<RawIssue> {
    let pattern = Regex::new(r"([\w./\\-]+\.py):(\d+):\d+:?\s*([A-Z]\d+)\s+(.+)")
        .expect("lint pattern is valid");
    let mut issues = Vec::new();
    for line in output.lines() {
        if let Some(caps) = pattern.captures(line) {
            let file = normalize_path(&caps[1]);
            let line_no: usize = match caps[2].parse() {
                Ok(n) => n,
                Err(_) => continue,
            };
            let code = caps[3].to_string();
            let message = caps[4].trim();
            issues.push(RawIssue {
                file,
                line: line_no,
                description: format!("{code} {message}"),
                code,
            });
        }
    }
    issues
}

/// Parse pytest `--tb=short` output for source-file logic bugs.
///
/// Only frames after the start of a FAILURES section count, and frames that
/// point into test files are skipped: the bug lives in the source function
/// the test exercised, not in the test itself.
pub fn parse_test_output(output: &str) -> Vec<RawIssue> {
    let frame = Regex::new(r"^\s*([\w./\\-]+\.py):(\d+):\s+in\s+(\w+)")
        .expect("traceback pattern is valid");
    let error_line = Regex::new(r"^E\s+(.+)").expect("error pattern is valid");

    let lines: Vec<&str> = output.lines().collect();
    let start = lines.iter().position(|line| {
        line.contains("=== FAILURES ===") || line.trim_start().starts_with("FAILED ")
    });
    let Some(start) = start else {
        return Vec::new();
    };

    let mut issues = Vec::new();
    for (i, line) in lines.iter().enumerate().skip(start) {
        let Some(caps) = frame.captures(line) else {
            continue;
        };
        let file = normalize_path(&caps[1]);
        if file.contains("test_") || file.starts_with("tests/") {
            continue;
        }
        let line_no: usize = match caps[2].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let func = &caps[3];

        let mut description = format!("LOGIC assert error in {func}");
        for follow in lines.iter().take((i + 8).min(lines.len())).skip(i + 1) {
            if let Some(e) = error_line.captures(follow) {
                description = format!("LOGIC {}", e[1].trim());
                break;
            }
        }

        issues.push(RawIssue {
            file,
            line: line_no,
            code: "LOGIC".to_string(),
            description,
        });
    }
    issues
}

/// Parse mypy `file.py:line: error: message` output.
pub fn parse_type_checker_output(output: &str) -> Vec<RawIssue> {
    let pattern =
        Regex::new(r"([\w/\\.\-]+\.py):(\d+):\s*error:\s*(.+)").expect("mypy pattern is valid");
    let mut issues = Vec::new();
    for line in output.lines() {
        if let Some(caps) = pattern.captures(line) {
            let line_no: usize = match caps[2].parse() {
                Ok(n) => n,
                Err(_) => continue,
            };
            issues.push(RawIssue {
                file: normalize_path(&caps[1]),
                line: line_no,
                code: "TYPE_ERROR".to_string(),
                description: format!("TYPE_ERROR {}", caps[3].trim()),
            });
        }
    }
    issues
}

/// Run every parser over the raw verification output and produce the unified,
/// deduplicated failure list.
///
/// Traceback-derived entries are always LOGIC and type-checker entries are
/// always TYPE_ERROR; lint entries go through [`classify_bug_type`].
pub fn classify_failures(raw_output: &str) -> Vec<Failure> {
    let mut all = parse_lint_output(raw_output);
    all.extend(parse_test_output(raw_output));
    all.extend(parse_type_checker_output(raw_output));

    let mut seen: HashSet<(String, usize)> = HashSet::new();
    let mut failures = Vec::new();
    for issue in all {
        if !seen.insert((issue.file.clone(), issue.line)) {
            continue;
        }
        let bug_type = match issue.code.as_str() {
            "LOGIC" => BugType::Logic,
            "TYPE_ERROR" => BugType::TypeError,
            code => classify_bug_type(code, &issue.description),
        };
        failures.push(Failure {
            file: issue.file,
            line: issue.line,
            bug_type,
            description: issue.description,
        });
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bug_type_prefix_rules() {
        assert_eq!(classify_bug_type("F401", ""), BugType::Import);
        assert_eq!(classify_bug_type("E401", ""), BugType::Import);
        assert_eq!(classify_bug_type("E999", ""), BugType::Syntax);
        assert_eq!(classify_bug_type("E111", ""), BugType::Indentation);
        assert_eq!(classify_bug_type("E302", ""), BugType::Linting);
        assert_eq!(classify_bug_type("W391", ""), BugType::Linting);
    }

    #[test]
    fn bug_type_message_fallbacks() {
        assert_eq!(classify_bug_type("", "invalid syntax"), BugType::Syntax);
        assert_eq!(
            classify_bug_type("", "unexpected indent"),
            BugType::Indentation
        );
        assert_eq!(classify_bug_type("", "cannot import name"), BugType::Import);
        assert_eq!(classify_bug_type("", "something else"), BugType::Linting);
    }

    #[test]
    fn lint_parser_keeps_code_in_description() {
        let out = "./src/app.py:3:5: E712 comparison to True should be 'if cond is True:'";
        let issues = parse_lint_output(out);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].file, "src/app.py");
        assert_eq!(issues[0].line, 3);
        assert_eq!(issues[0].code, "E712");
        assert!(issues[0].description.starts_with("E712 "));
    }

    #[test]
    fn test_parser_requires_failures_section() {
        let out = "calc.py:10: in divide\nE   assert 4 == 5";
        assert!(parse_test_output(out).is_empty());
    }

    #[test]
    fn test_parser_skips_test_files_and_reads_error_line() {
        let out = "\
=================================== FAILURES ===================================
____________________________________ test_div __________________________________
tests/test_calc.py:7: in test_div
    assert divide(10, 2) == 5
calc.py:4: in divide
    return a * b
E   assert 20 == 5";
        let issues = parse_test_output(out);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].file, "calc.py");
        assert_eq!(issues[0].line, 4);
        assert_eq!(issues[0].description, "LOGIC assert 20 == 5");
    }

    #[test]
    fn type_checker_parser_extracts_message() {
        let out = "app.py:12: error: Incompatible return value type";
        let issues = parse_type_checker_output(out);
        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].description,
            "TYPE_ERROR Incompatible return value type"
        );
    }

    #[test]
    fn dedup_keeps_highest_priority_parser() {
        // Same (file, line) reported by lint and by mypy: lint wins.
        let out = "\
app.py:5:1: E303 too many blank lines (3)
app.py:5: error: Name 'x' is not defined";
        let failures = classify_failures(out);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].bug_type, BugType::Linting);
        assert!(failures[0].description.starts_with("E303"));
    }

    #[test]
    fn no_duplicate_file_line_pairs() {
        let out = "\
a.py:1:1: W291 trailing whitespace
a.py:1:9: E501 line too long (140 > 120 characters)
a.py:2:1: W391 blank line at end of file";
        let failures = classify_failures(out);
        let mut keys: Vec<(String, usize)> = failures
            .iter()
            .map(|f| (f.file.clone(), f.line))
            .collect();
        keys.dedup();
        assert_eq!(keys.len(), failures.len());
        assert_eq!(failures.len(), 2);
    }
}
