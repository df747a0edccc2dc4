//! Ephemeral repository workspaces.
//!
//! Each run shallow-clones its target into a uniquely named temp directory.
//! The directory is removed when the workspace handle drops, regardless of
//! how the run concluded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::io::command;

/// Directories excluded from every workspace walk (vendor/build/cache).
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    "env",
    "dist",
    "build",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    "target",
];

const CONFIG_NAMES: &[&str] = &[
    "pytest.ini",
    "setup.cfg",
    "pyproject.toml",
    "package.json",
    "tsconfig.json",
    ".flake8",
    "mypy.ini",
    "tox.ini",
    "Makefile",
    "pom.xml",
];

/// Classified file manifest produced by the structure scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureManifest {
    pub test_files: Vec<String>,
    pub source_files: Vec<String>,
    pub config_files: Vec<String>,
}

impl StructureManifest {
    pub fn total_files(&self) -> usize {
        self.test_files.len() + self.source_files.len()
    }
}

/// A cloned repository in a temp directory, removed on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Shallow-clone `repo_url` into a fresh temp directory.
///
/// When a token is supplied and the URL is a recognized hosted-git URL, the
/// token is embedded in the clone URL only; it is stripped from any error
/// text before surfacing. The temp directory is removed immediately on
/// failure.
#[instrument(skip_all, fields(repo_url))]
pub fn clone_repo(repo_url: &str, token: Option<&str>, timeout: Duration) -> Result<Workspace> {
    let dir = TempDir::with_prefix("cicd_agent_").context("create workspace dir")?;

    let clone_url = match token {
        Some(token) if repo_url.starts_with("https://github.com/") => repo_url.replace(
            "https://github.com/",
            &format!("https://{token}@github.com/"),
        ),
        _ => repo_url.to_string(),
    };

    info!(repo_url, "cloning repository");
    let cmd = format!("git clone --depth 1 {clone_url} {}", dir.path().display());
    let result = command::run(&cmd, Path::new("."), timeout);
    if !result.success() {
        let mut reason = result.merged_output();
        if let Some(token) = token {
            reason = reason.replace(token, "***");
        }
        warn!("clone failed");
        // TempDir drop removes the partial clone.
        return Err(anyhow!("clone failed: {}", reason.trim()));
    }

    debug!(path = %dir.path().display(), "clone complete");
    Ok(Workspace { dir })
}

fn is_excluded(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

/// True when a filename looks like a test file (dynamic, no hardcoded paths).
pub fn is_test_file(filename: &str) -> bool {
    if filename.starts_with('.') {
        return false;
    }
    filename.starts_with("test_")
        || filename.ends_with("_test.py")
        || filename.ends_with(".test.js")
        || filename.ends_with(".test.ts")
        || filename.ends_with(".spec.js")
        || filename.ends_with(".spec.ts")
        || filename.to_lowercase().contains("test")
}

/// Walk the workspace (excluding vendor/build/cache dirs) and classify every
/// file as test/source/config by filename pattern.
pub fn scan_structure(root: &Path) -> StructureManifest {
    let mut manifest = StructureManifest::default();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry))
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().to_string();
        let rel_path = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        if CONFIG_NAMES.contains(&filename.as_str()) {
            manifest.config_files.push(rel_path.clone());
        }
        if is_test_file(&filename) {
            manifest.test_files.push(rel_path);
        } else {
            manifest.source_files.push(rel_path);
        }
    }

    manifest.test_files.sort();
    manifest.source_files.sort();
    manifest.config_files.sort();
    manifest
}
