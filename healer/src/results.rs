//! The structured results document emitted at finalize.
//!
//! Persisted as `results.json` in the workspace root and embedded in the run
//! record for pollers. The `agent_output` lines follow an exact format
//! consumed by downstream evaluation, so their shape must not drift.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::{Fix, ScoreBreakdown};
use crate::state::{timestamp, RunState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsDocument {
    pub run_summary: RunSummary,
    pub score_breakdown: ScoreBreakdown,
    pub fixes: Vec<Fix>,
    pub ci_timeline: Vec<CiTimelineEntry>,
    pub agent_output: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub repo_url: String,
    pub team_name: String,
    pub team_leader: String,
    pub branch_name: String,
    pub final_status: String,
    pub iterations: u32,
    pub max_iterations: u32,
    pub total_commits: usize,
    pub total_fixes: usize,
    pub pr_url: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub total_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiTimelineEntry {
    pub iteration: u32,
    pub iteration_label: String,
    pub status: String,
    pub timestamp: String,
}

/// Assemble the document from final run state. Pure; writing is separate.
pub fn build_results(state: &RunState) -> ResultsDocument {
    ResultsDocument {
        run_summary: RunSummary {
            repo_url: state.repo_url.clone(),
            team_name: state.team_name.clone(),
            team_leader: state.team_leader.clone(),
            branch_name: state.branch_name.clone(),
            final_status: state.final_status.as_str().to_string(),
            iterations: state.iteration,
            max_iterations: state.max_iterations,
            total_commits: state.commits.len(),
            total_fixes: state.fixes.len(),
            pr_url: state.pr_url.clone(),
            started_at: timestamp(state.started_at),
            ended_at: state.ended_at.map(timestamp),
            total_seconds: state.total_seconds(),
        },
        score_breakdown: state.score.clone(),
        fixes: state.fixes.clone(),
        ci_timeline: state
            .ci_runs
            .iter()
            .map(|run| CiTimelineEntry {
                iteration: run.iteration,
                iteration_label: format!("{}/{}", run.iteration, state.max_iterations),
                status: run.status.as_str().to_string(),
                timestamp: run.timestamp.clone(),
            })
            .collect(),
        agent_output: state.failures.iter().map(|f| f.to_agent_output()).collect(),
    }
}

/// Write the document as pretty JSON into `results.json` under `root`.
pub fn write_results(root: &Path, document: &ResultsDocument) -> Result<()> {
    let json = serde_json::to_string_pretty(document).context("serialize results document")?;
    fs::write(root.join("results.json"), json).context("write results.json")
}
