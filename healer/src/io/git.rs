//! Git adapter for the integration workflow.
//!
//! The pipeline commits deterministically and pushes over a freshly built
//! authenticated URL, so we keep a small, explicit wrapper around `git`
//! subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::io::command;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True when the working directory is inside a git repository.
    pub fn is_repository(&self) -> bool {
        self.run(&["rev-parse", "--git-dir"])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Checkout the named branch, creating it at HEAD if it does not exist.
    #[instrument(skip_all, fields(branch))]
    pub fn ensure_branch(&self, branch: &str) -> Result<()> {
        if self.run(&["checkout", "-b", branch])?.status.success() {
            debug!(branch, "created branch");
            return Ok(());
        }
        // Branch already exists (or -b failed for another reason): plain
        // checkout decides.
        self.run_checked(&["checkout", branch])?;
        debug!(branch, "checked out existing branch");
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes and return the new commit sha.
    ///
    /// Returns Ok(None) without committing when nothing is staged.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<Option<String>> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(None);
        }
        self.run_checked(&["commit", "-m", message])?;
        let sha = self.run_capture(&["rev-parse", "HEAD"])?.trim().to_string();
        debug!(sha = %sha, "committed staged changes");
        Ok(Some(sha))
    }

    /// Unified diff for one file against HEAD (unstaged working-tree delta).
    pub fn diff_file(&self, file: &str) -> Result<String> {
        let out = self.run(&["diff", "--", file])?;
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// True when the file has a staged or unstaged delta. Version control is
    /// the ground truth for "did anything actually change".
    pub fn has_any_changes(&self, file: &str) -> bool {
        let unstaged = self
            .run(&["diff", "--", file])
            .map(|out| !out.stdout.is_empty())
            .unwrap_or(false);
        if unstaged {
            return true;
        }
        self.run(&["diff", "--cached", "--", file])
            .map(|out| !out.stdout.is_empty())
            .unwrap_or(false)
    }

    /// Configured URL of the `origin` remote.
    pub fn origin_url(&self) -> Result<String> {
        Ok(self
            .run_capture(&["remote", "get-url", "origin"])?
            .trim()
            .to_string())
    }

    /// Force-push HEAD to `branch` on origin over a token-authenticated URL
    /// built fresh from the remote's owner/repo (embedded credentials in the
    /// configured URL are ignored). The token is redacted from error text.
    #[instrument(skip_all, fields(branch))]
    pub fn push_with_token(&self, branch: &str, token: &str, timeout: Duration) -> Result<()> {
        let origin = self.origin_url()?;
        let (owner, repo) = parse_owner_repo(&origin)
            .ok_or_else(|| anyhow!("cannot parse GitHub repo from origin URL"))?;

        let push_url = format!("https://{token}@github.com/{owner}/{repo}.git");
        debug!(repo = %format!("{owner}/{repo}"), "pushing over authenticated URL");

        let cmd = format!("git push {push_url} HEAD:{branch} --set-upstream --force");
        let result = command::run(&cmd, &self.workdir, timeout);
        if result.success() {
            return Ok(());
        }
        let reason = result.merged_output().replace(token, "***");
        warn!("push failed");
        Err(anyhow!("push failed: {}", reason.trim()))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Extract `(owner, repo)` from any GitHub remote URL form, ignoring embedded
/// credentials and a trailing `.git`.
pub fn parse_owner_repo(url: &str) -> Option<(String, String)> {
    let pattern =
        Regex::new(r"github\.com[/:]([^/\s]+)/([^/\s]+?)(?:\.git)?/?$").expect("pattern is valid");
    let caps = pattern.captures(url.trim())?;
    Some((caps[1].to_string(), caps[2].to_string()))
}
