//! Patch synthesis: turns classified failures and logic signals into
//! line-level source edits inside the workspace.
//!
//! Two independent strategies run per iteration. Logic repair works off the
//! raw test output and runs even when the failure list is empty; catalogue
//! fixes walk the deduplicated failure list sorted by file and by descending
//! line so that edits never invalidate line numbers still pending in the
//! same file.

use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::repair::{extract_logic_signals, find_function_def, repair_function};
use crate::core::strategies::apply_fix_for_bug_type;
use crate::core::types::{BugType, Failure, Fix, FixStatus};
use crate::io::git::Git;

/// Synthesize fixes for one iteration. Logic repair first, then the
/// catalogue pass over `failures`. Per-fix errors never abort the rest.
#[instrument(skip_all, fields(failures = failures.len()))]
pub fn synthesize_fixes(root: &Path, failures: &[Failure], raw_output: &str) -> Vec<Fix> {
    let mut fixes = repair_logic_bugs(root, raw_output);

    let mut ordered: Vec<&Failure> = failures.iter().collect();
    ordered.sort_by_key(|f| (f.file.clone(), Reverse(f.line)));

    for failure in ordered {
        fixes.push(apply_catalogue_fix(root, failure));
    }
    info!(
        fixed = fixes.iter().filter(|f| f.status == FixStatus::Fixed).count(),
        total = fixes.len(),
        "fix synthesis complete"
    );
    fixes
}

/// Scan raw test output for failing asserts and attempt one operator swap
/// on each implicated function. Files that do not change produce no Fix.
fn repair_logic_bugs(root: &Path, raw_output: &str) -> Vec<Fix> {
    let mut fixes = Vec::new();

    for signal in extract_logic_signals(raw_output) {
        let Some((path, def_idx)) = locate_function(root, &signal.function) else {
            debug!(function = %signal.function, "no definition found for failing assert");
            continue;
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                warn!(file = %path.display(), err = %err, "read failed during logic repair");
                continue;
            }
        };
        let Some(repaired) = repair_function(&content, def_idx) else {
            continue;
        };
        let relative = relative_to(root, &path);
        if let Err(err) = fs::write(&path, &repaired) {
            warn!(file = %relative, err = %err, "write failed during logic repair");
            continue;
        }
        let line = def_idx + 1;
        fixes.push(Fix {
            file: relative.clone(),
            line,
            bug_type: BugType::Logic,
            commit_message: Fix::commit_message_for(BugType::Logic, &relative, line),
            status: FixStatus::Fixed,
            diff: capture_diff(root, &relative),
        });
        info!(file = %relative, function = %signal.function, "operator repair applied");
    }
    fixes
}

/// Apply the catalogue transformation for one failure. The edit runs on an
/// in-memory copy; the file is only written when the content changed.
fn apply_catalogue_fix(root: &Path, failure: &Failure) -> Fix {
    let commit_message =
        Fix::commit_message_for(failure.bug_type, &failure.file, failure.line);
    let failed = |reason: &str| Fix {
        file: failure.file.clone(),
        line: failure.line,
        bug_type: failure.bug_type,
        commit_message: commit_message.clone(),
        status: FixStatus::Failed,
        diff: reason.to_string(),
    };

    let path = root.join(&failure.file);
    if !path.is_file() {
        return failed(&format!("File not found: {}", failure.file));
    }
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) => return failed(&format!("Could not read file: {err}")),
    };
    if failure.line == 0 {
        return failed("Fix strategy produced no changes");
    }

    let updated = apply_fix_for_bug_type(
        &content,
        failure.line - 1,
        failure.bug_type,
        &failure.description,
    );
    if updated == content {
        return failed("Fix strategy produced no changes");
    }
    if let Err(err) = fs::write(&path, &updated) {
        return failed(&format!("Could not write file: {err}"));
    }

    debug!(file = %failure.file, line = failure.line, bug_type = failure.bug_type.as_str(), "fix applied");
    Fix {
        file: failure.file.clone(),
        line: failure.line,
        bug_type: failure.bug_type,
        commit_message,
        status: FixStatus::Fixed,
        diff: capture_diff(root, &failure.file),
    }
}

/// Find the first file defining `function`, scanning `src/` before the
/// workspace root. Entries are visited in sorted order, `.py` files only,
/// skipping `test_*` names.
fn locate_function(root: &Path, function: &str) -> Option<(PathBuf, usize)> {
    for dir in [root.join("src"), root.to_path_buf()] {
        let Ok(entries) = sorted_python_sources(&dir) else {
            continue;
        };
        for path in entries {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            if let Some(def_idx) = find_function_def(&content, function) {
                return Some((path, def_idx));
            }
        }
    }
    None
}

fn sorted_python_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".py") && !name.starts_with("test_") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Workspaces are git clones, so git gives the unified diff back for free.
fn capture_diff(root: &Path, relative: &str) -> String {
    match Git::new(root).diff_file(relative) {
        Ok(diff) if !diff.trim().is_empty() => diff,
        Ok(_) => format!("Modified {relative}"),
        Err(err) => {
            warn!(file = relative, err = %err, "diff capture failed");
            format!("Modified {relative}")
        }
    }
}

fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Demote fixes whose file shows no staged or unstaged delta. Version
/// control is the ground truth for whether anything actually changed.
pub fn reconcile_with_worktree(root: &Path, fixes: &mut [Fix]) {
    let git = Git::new(root);
    if !git.is_repository() {
        return;
    }
    for fix in fixes.iter_mut() {
        if fix.status == FixStatus::Fixed && !git.has_any_changes(&fix.file) {
            warn!(file = %fix.file, "fix demoted, no changes detected by git");
            fix.status = FixStatus::Failed;
            fix.diff = "No changes detected by git".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_repo as seeded_workspace;

    #[test]
    fn catalogue_fix_rewrites_e712_and_captures_diff() {
        let dir = seeded_workspace(&[(
            "app.py",
            "def check(flag):\n    if flag == True:\n        return 1\n    return 0\n",
        )]);
        let failure = Failure {
            file: "app.py".to_string(),
            line: 2,
            bug_type: BugType::Linting,
            description: "E712 comparison to True should be 'if cond is True:'".to_string(),
        };

        let fixes = synthesize_fixes(dir.path(), &[failure], "");
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].status, FixStatus::Fixed);
        assert!(fixes[0].diff.contains("is True"));

        let content = fs::read_to_string(dir.path().join("app.py")).expect("read");
        assert!(content.contains("if flag is True:"));
    }

    #[test]
    fn missing_file_yields_failed_fix_without_aborting() {
        let dir = seeded_workspace(&[("real.py", "import os\n")]);
        let failures = vec![
            Failure {
                file: "ghost.py".to_string(),
                line: 1,
                bug_type: BugType::Linting,
                description: "W291 trailing whitespace".to_string(),
            },
            Failure {
                file: "real.py".to_string(),
                line: 1,
                bug_type: BugType::Import,
                description: "F401 'os' imported but unused".to_string(),
            },
        ];

        let fixes = synthesize_fixes(dir.path(), &failures, "");
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].status, FixStatus::Failed);
        assert!(fixes[0].diff.contains("File not found"));
        assert_eq!(fixes[1].status, FixStatus::Fixed);
    }

    #[test]
    fn fixes_within_a_file_apply_bottom_up() {
        let dir = seeded_workspace(&[(
            "multi.py",
            "import os\nimport sys\nx = 1 \ny = 2 \n",
        )]);
        let failures = vec![
            Failure {
                file: "multi.py".to_string(),
                line: 1,
                bug_type: BugType::Import,
                description: "F401 'os' imported but unused".to_string(),
            },
            Failure {
                file: "multi.py".to_string(),
                line: 2,
                bug_type: BugType::Import,
                description: "F401 'sys' imported but unused".to_string(),
            },
        ];

        let fixes = synthesize_fixes(dir.path(), &failures, "");
        assert!(fixes.iter().all(|f| f.status == FixStatus::Fixed));
        // Line 2 removed before line 1, so both imports are gone.
        let content = fs::read_to_string(dir.path().join("multi.py")).expect("read");
        assert_eq!(content, "x = 1 \ny = 2 \n");
        assert_eq!(fixes[0].line, 2);
        assert_eq!(fixes[1].line, 1);
    }

    #[test]
    fn reapplying_a_fix_reports_failed_not_reapplied() {
        let dir = seeded_workspace(&[("app.py", "if flag == True:\n    pass\n")]);
        let failure = Failure {
            file: "app.py".to_string(),
            line: 1,
            bug_type: BugType::Linting,
            description: "E712 comparison to True".to_string(),
        };

        let first = synthesize_fixes(dir.path(), std::slice::from_ref(&failure), "");
        assert_eq!(first[0].status, FixStatus::Fixed);

        let second = synthesize_fixes(dir.path(), &[failure], "");
        assert_eq!(second[0].status, FixStatus::Failed);
        assert_eq!(second[0].diff, "Fix strategy produced no changes");
    }

    #[test]
    fn logic_repair_patches_function_from_traceback() {
        let dir = seeded_workspace(&[
            ("src/calc.py", "def divide(a, b):\n    return a * b\n"),
            ("test_calc.py", "from src.calc import divide\n"),
        ]);
        let output = "\
=================================== FAILURES ===================================
    def test_divide():
        assert divide(10, 2) == 5
E       assert 20 == 5
FAILED test_calc.py::test_divide";

        let fixes = synthesize_fixes(dir.path(), &[], output);
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].bug_type, BugType::Logic);
        assert_eq!(fixes[0].file, "src/calc.py");

        let content = fs::read_to_string(dir.path().join("src/calc.py")).expect("read");
        assert!(content.contains("return a / b"));
    }

    #[test]
    fn reconcile_demotes_fix_without_worktree_delta() {
        let dir = seeded_workspace(&[("app.py", "x = 1\n")]);
        let mut fixes = vec![Fix {
            file: "app.py".to_string(),
            line: 1,
            bug_type: BugType::Linting,
            commit_message: String::new(),
            status: FixStatus::Fixed,
            diff: "claimed".to_string(),
        }];

        reconcile_with_worktree(dir.path(), &mut fixes);
        assert_eq!(fixes[0].status, FixStatus::Failed);
        assert_eq!(fixes[0].diff, "No changes detected by git");
    }
}
