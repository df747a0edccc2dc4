//! The classify → synthesize → integrate path with scripted tool output.

use healer::core::classify::classify_failures;
use healer::core::types::{BugType, FixStatus};
use healer::io::git::Git;
use healer::io::patch::{reconcile_with_worktree, synthesize_fixes};
use healer::test_support::{scratch_repo, DIVIDE_PYTEST_OUTPUT, E712_LINT_OUTPUT};

#[test]
fn e712_failure_is_fixed_and_committed() {
    let repo = scratch_repo(&[(
        "app.py",
        "def check(cond):\n    x = 1\n    if cond == True:\n        return x\n    return 0\n",
    )]);

    let failures = classify_failures(E712_LINT_OUTPUT);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].line, 3);
    assert_eq!(failures[0].bug_type, BugType::Linting);

    let mut fixes = synthesize_fixes(repo.path(), &failures, E712_LINT_OUTPUT);
    reconcile_with_worktree(repo.path(), &mut fixes);
    assert_eq!(fixes.len(), 1);
    assert_eq!(fixes[0].status, FixStatus::Fixed);

    let content = std::fs::read_to_string(repo.path().join("app.py")).expect("read");
    assert!(content.contains("if cond is True:"));
    assert!(!content.contains("== True"));

    // Integrate on the dedicated branch; git reports a real commit.
    let git = Git::new(repo.path());
    git.ensure_branch("CODE_WARRIORS_JOHN_DOE_AI_Fix").expect("branch");
    git.add_all().expect("stage");
    let sha = git
        .commit_staged(&fixes[0].commit_message)
        .expect("commit")
        .expect("something was staged");
    assert_eq!(sha.len(), 40);

    // A second pass over clean output finds nothing left to fix.
    assert!(classify_failures("").is_empty());
}

#[test]
fn divide_traceback_repairs_the_wrong_operator() {
    let repo = scratch_repo(&[
        ("src/calc.py", "def divide(a, b):\n    return a * b\n"),
        (
            "tests/test_calc.py",
            "from src.calc import divide\n\n\ndef test_divide():\n    assert divide(10, 2) == 5\n",
        ),
    ]);

    // Traceback frames inside test files are skipped by the classifier, so
    // the repair rides on the raw output alone.
    let failures = classify_failures(DIVIDE_PYTEST_OUTPUT);
    let fixes = synthesize_fixes(repo.path(), &failures, DIVIDE_PYTEST_OUTPUT);

    let logic: Vec<_> = fixes
        .iter()
        .filter(|f| f.bug_type == BugType::Logic && f.status == FixStatus::Fixed)
        .collect();
    assert_eq!(logic.len(), 1);
    assert_eq!(logic[0].file, "src/calc.py");

    let content = std::fs::read_to_string(repo.path().join("src/calc.py")).expect("read");
    assert_eq!(content, "def divide(a, b):\n    return a / b\n");
}

#[test]
fn mixed_output_dedups_by_file_and_line_keeping_lint_first() {
    let mixed = format!("{E712_LINT_OUTPUT}\n./app.py:3:11: E712 duplicate\n");
    let failures = classify_failures(&mixed);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].description.contains("comparison to True"));
}
