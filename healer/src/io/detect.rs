//! Dominant-ecosystem detection and the command table.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::io::workspace::EXCLUDED_DIRS;

/// Tie-break priority when two ecosystems have the same file count.
const PRIORITY: &[&str] = &["python", "typescript", "javascript", "java"];

/// Detected ecosystem with its canonical verification commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub language: String,
    pub test_command: Option<String>,
    pub lint_command: Option<String>,
}

impl Environment {
    pub fn unknown() -> Self {
        Self {
            language: "unknown".to_string(),
            test_command: None,
            lint_command: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.test_command.is_none()
    }
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "py" => Some("python"),
        "js" => Some("javascript"),
        "ts" => Some("typescript"),
        "java" => Some("java"),
        _ => None,
    }
}

fn test_command_for(language: &str) -> Option<&'static str> {
    match language {
        "python" => Some("python -m pytest --tb=short -q -x --maxfail=1"),
        "javascript" | "typescript" => Some("npm test -- --runInBand --watch=false --bail=1"),
        "java" => Some("mvn test -q"),
        _ => None,
    }
}

fn lint_command_for(language: &str) -> Option<&'static str> {
    match language {
        "python" => Some("python -m flake8 . --format=default --max-line-length=120"),
        "javascript" | "typescript" => Some("npx eslint . --format=compact"),
        _ => None,
    }
}

/// Pick the dominant ecosystem from per-language file counts. Ties break by
/// the fixed priority ordering; an empty census yields `unknown`.
pub fn pick_dominant(counts: &HashMap<String, usize>) -> Environment {
    let mut best: Option<(&str, usize, usize)> = None;
    for (language, &count) in counts {
        let priority = PRIORITY
            .iter()
            .position(|p| p == language)
            .unwrap_or(PRIORITY.len());
        let candidate = (language.as_str(), count, priority);
        best = match best {
            None => Some(candidate),
            Some(current) => {
                // Higher count wins; equal count prefers the lower priority index.
                if candidate.1 > current.1 || (candidate.1 == current.1 && candidate.2 < current.2)
                {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        };
    }

    let Some((language, count, _)) = best else {
        return Environment::unknown();
    };
    debug!(language, count, "dominant ecosystem");
    Environment {
        language: language.to_string(),
        test_command: test_command_for(language).map(str::to_string),
        lint_command: lint_command_for(language).map(str::to_string),
    }
}

/// Count files by extension across the workspace (same exclusion set as the
/// structure scan) and map the winner to its command table entry.
pub fn detect_environment(root: &Path) -> Environment {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| EXCLUDED_DIRS.contains(&name)))
        })
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        if let Some(language) = ext.as_deref().and_then(language_for_extension) {
            *counts.entry(language.to_string()).or_insert(0) += 1;
        }
    }

    let environment = pick_dominant(&counts);
    info!(
        language = %environment.language,
        test_command = ?environment.test_command,
        "environment detected"
    );
    environment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, usize)]) -> HashMap<String, usize> {
        pairs
            .iter()
            .map(|(language, count)| (language.to_string(), *count))
            .collect()
    }

    #[test]
    fn highest_count_wins() {
        let env = pick_dominant(&counts(&[("python", 3), ("javascript", 10)]));
        assert_eq!(env.language, "javascript");
        assert_eq!(
            env.test_command.as_deref(),
            Some("npm test -- --runInBand --watch=false --bail=1")
        );
    }

    #[test]
    fn ties_break_by_priority() {
        let env = pick_dominant(&counts(&[("javascript", 4), ("python", 4)]));
        assert_eq!(env.language, "python");

        let env = pick_dominant(&counts(&[("javascript", 2), ("typescript", 2)]));
        assert_eq!(env.language, "typescript");
    }

    #[test]
    fn empty_census_is_unknown() {
        let env = pick_dominant(&HashMap::new());
        assert!(env.is_unknown());
        assert_eq!(env.language, "unknown");
        assert!(env.lint_command.is_none());
    }

    #[test]
    fn java_has_no_lint_command() {
        let env = pick_dominant(&counts(&[("java", 5)]));
        assert_eq!(env.test_command.as_deref(), Some("mvn test -q"));
        assert!(env.lint_command.is_none());
    }

    #[test]
    fn detect_walks_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.py"), "x = 1\n").expect("write");
        std::fs::write(temp.path().join("b.py"), "y = 2\n").expect("write");
        std::fs::write(temp.path().join("c.js"), "let z;\n").expect("write");
        let env = detect_environment(temp.path());
        assert_eq!(env.language, "python");
    }
}
