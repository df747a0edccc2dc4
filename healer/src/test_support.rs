//! Test-only helpers for constructing scripted workspaces and tool output.

use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Captured flake8 output flagging an `E712` comparison on line 3.
pub const E712_LINT_OUTPUT: &str =
    "./app.py:3:11: E712 comparison to True should be 'if cond is True:'";

/// Captured pytest output for a failing division assert.
pub const DIVIDE_PYTEST_OUTPUT: &str = "\
=================================== FAILURES ===================================
________________________________ test_divide ___________________________________
    def test_divide():
        assert divide(10, 2) == 5
E       assert 20 == 5
E        +  where 20 = divide(10, 2)
FAILED tests/test_calc.py::test_divide
1 failed in 0.02s";

/// Run `git` with `args` in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .status()
        .expect("git spawns");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

/// Create a committed git repository containing `files`.
pub fn scratch_repo(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    git(dir.path(), &["init", "-q", "-b", "main"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    git(dir.path(), &["config", "user.name", "Test"]);
    write_files(dir.path(), files);
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-q", "-m", "seed"]);
    dir
}

/// Write `files` into `root`, creating parent directories as needed.
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write file");
    }
}

/// A committed repository whose only source files are Java. With no pom.xml
/// the detected test command (`mvn test -q`) always fails, and the
/// classifier finds nothing to fix.
pub fn unfixable_java_repo() -> TempDir {
    scratch_repo(&[(
        "src/Main.java",
        "public class Main { public static void main(String[] a) {} }\n",
    )])
}
