//! Logic-bug signal extraction and operator repair.
//!
//! Runs independently of the classified failure list: the raw verification
//! output is scanned for failing `assert f(args) == expected` pairs, and the
//! offending source function gets one operator substitution in a small window
//! after its definition.

use regex::Regex;

use crate::core::strategies::{is_repair_candidate, swap_first_operator, FileText};

/// One failing assertion extracted from test output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicSignal {
    pub function: String,
    pub args: String,
    pub expected: String,
    pub actual: String,
}

/// Scan raw test output for assertion lines of the shape
/// `assert f(args) == expected` paired with a following `E  assert <actual> ==`
/// report line within four lines. Signals where actual equals expected are
/// dropped (the assertion did not fail on the value).
pub fn extract_logic_signals(raw_output: &str) -> Vec<LogicSignal> {
    if !raw_output.contains("assert") || !raw_output.contains("FAILED") {
        return Vec::new();
    }

    let assert_line =
        Regex::new(r"^\s+assert\s+(\w+)\(([^)]*)\)\s*==\s*(.+)").expect("pattern is valid");
    let actual_line = Regex::new(r"^E\s+assert\s+(\S+)\s+==").expect("pattern is valid");

    let lines: Vec<&str> = raw_output.lines().collect();
    let mut signals = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = assert_line.captures(line) else {
            continue;
        };
        let function = caps[1].to_string();
        let args = caps[2].to_string();
        let expected = caps[3].trim().to_string();

        let mut actual = None;
        for follow in lines.iter().take((i + 5).min(lines.len())).skip(i + 1) {
            if let Some(a) = actual_line.captures(follow) {
                actual = Some(a[1].to_string());
                break;
            }
        }
        let Some(actual) = actual else {
            continue;
        };
        if actual == expected {
            continue;
        }

        signals.push(LogicSignal {
            function,
            args,
            expected,
            actual,
        });
    }
    signals
}

/// Find the first `def <name>(` line in a file, zero-based.
pub fn find_function_def(content: &str, function: &str) -> Option<usize> {
    let pattern = Regex::new(&format!(r"^\s*def\s+{}\s*\(", regex::escape(function)))
        .expect("pattern is valid");
    content.lines().position(|line| pattern.is_match(line))
}

/// Attempt the operator repair on `content` around the function defined at
/// zero-based `def_idx`: return/assignment lines in a window from one line
/// above the definition to nine lines below, first substitution that changes
/// a line wins. Returns the new content only when something changed.
pub fn repair_function(content: &str, def_idx: usize) -> Option<String> {
    let mut text = FileText::parse(content);
    let start = def_idx.saturating_sub(1);
    let end = (def_idx + 10).min(text.lines.len());

    for i in start..end {
        if !is_repair_candidate(&text.lines[i]) {
            continue;
        }
        if let Some(new_line) = swap_first_operator(&text.lines[i]) {
            text.lines[i] = new_line;
            return Some(text.render());
        }
    }
    None
}
