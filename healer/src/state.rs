//! Per-run mutable state, owned by exactly one pipeline execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{branch_name, CiRun, Failure, FinalStatus, Fix, ScoreBreakdown};
use crate::io::detect::Environment;
use crate::io::workspace::Workspace;

/// How a run was requested. `analyze-repository` forces read-only: no
/// commit, no push, no PR, regardless of what is fixable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    RunAgent,
    AnalyzeRepository,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::RunAgent => "run-agent",
            RunMode::AnalyzeRepository => "analyze-repository",
        }
    }

    pub fn is_read_only(self) -> bool {
        self == RunMode::AnalyzeRepository
    }
}

/// Everything one run loop reads and writes. Only the node the state is
/// currently passing through mutates it; `branch_name` is derived once at
/// construction and never reassigned.
#[derive(Debug)]
pub struct RunState {
    pub repo_url: String,
    pub team_name: String,
    pub team_leader: String,
    pub branch_name: String,
    /// Read-only runs never commit, push, or open a PR.
    pub read_only: bool,
    pub github_token: Option<String>,

    /// Holds the temp clone alive; dropped (and removed) with the state.
    pub workspace: Option<Workspace>,
    pub environment: Option<Environment>,

    pub iteration: u32,
    pub max_iterations: u32,
    pub test_passed: bool,
    /// Output of the last verification pass only.
    pub raw_output: String,
    pub deps_installed: bool,

    pub failures: Vec<Failure>,
    pub fixes: Vec<Fix>,
    pub commits: Vec<String>,
    pub ci_runs: Vec<CiRun>,

    pub pr_url: Option<String>,
    pub final_status: FinalStatus,
    pub score: ScoreBreakdown,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(
        repo_url: &str,
        team_name: &str,
        team_leader: &str,
        max_iterations: u32,
        read_only: bool,
        github_token: Option<String>,
    ) -> Self {
        Self {
            repo_url: repo_url.to_string(),
            team_name: team_name.to_string(),
            team_leader: team_leader.to_string(),
            branch_name: branch_name(team_name, team_leader),
            read_only,
            github_token,
            workspace: None,
            environment: None,
            iteration: 0,
            max_iterations,
            test_passed: false,
            raw_output: String::new(),
            deps_installed: false,
            failures: Vec::new(),
            fixes: Vec::new(),
            commits: Vec::new(),
            ci_runs: Vec::new(),
            pr_url: None,
            final_status: FinalStatus::Running,
            score: ScoreBreakdown::default(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn workspace_root(&self) -> Option<&std::path::Path> {
        self.workspace.as_ref().map(Workspace::path)
    }

    /// Append one audit-trail entry for a verification pass.
    pub fn record_ci_run(&mut self, status: FinalStatus) {
        self.ci_runs.push(CiRun {
            iteration: self.iteration,
            status,
            timestamp: timestamp(Utc::now()),
        });
    }

    /// Wall-clock duration so far, or of the whole run once ended.
    pub fn total_seconds(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// ISO-8601 UTC at second precision with a `Z` suffix.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
