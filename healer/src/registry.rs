//! Concurrent run registry: one record per externally-initiated run.
//!
//! All records live behind a single mutex. The lock is held only for the
//! duration of a read or a field update, never across a blocking call, so
//! status polling never waits on a running worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::diffsplit::split_diff_before_after;
use crate::core::types::{FinalStatus, FixStatus};
use crate::pipeline::{EventPhase, Node, NodeEvent, PipelineObserver};
use crate::results::{build_results, ResultsDocument};
use crate::state::{timestamp, RunState};

/// Human-facing pipeline step labels, in display order.
pub const PIPELINE_STEPS: &[&str] = &[
    "Clone Repo",
    "Install Dependencies",
    "Run Tests",
    "Detect Errors",
    "Generate Fix",
    "Apply Fix",
    "Re-run Tests",
    "Create Branch",
    "Done",
];

/// Map an orchestrator node to its display step. Integration and PR both
/// surface as `Create Branch`.
pub fn step_for_node(node: Node) -> &'static str {
    match node {
        Node::Workspace => "Clone Repo",
        Node::DetectLanguage => "Install Dependencies",
        Node::Verify => "Run Tests",
        Node::ClassifyFailures => "Detect Errors",
        Node::SynthesizeFixes => "Generate Fix",
        Node::ApplyChanges => "Apply Fix",
        Node::IntegrateChanges | Node::OpenPullRequest => "Create Branch",
        Node::CiMonitor => "Re-run Tests",
        Node::Finalize => "Done",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: String,
    pub status: StepStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub text: String,
}

/// One fix as shown to pollers, with the diff split into before/after
/// snippets for side-by-side display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixView {
    pub file: String,
    pub line: usize,
    pub bug_type: String,
    pub status: String,
    pub commit_message: String,
    pub before_snippet: String,
    pub after_snippet: String,
    pub diff: String,
}

/// Registry-owned record; outlives the loop execution for polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub mode: String,
    pub repo_url: String,
    pub team_name: String,
    pub team_leader: String,
    pub branch_name: String,
    pub final_status: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub test_passed: bool,
    pub failure_count: usize,
    pub fix_count: usize,
    pub commit_count: usize,
    pub pr_url: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub pipeline_steps: Vec<PipelineStep>,
    pub logs: Vec<LogEntry>,
    pub fixes: Vec<FixView>,
    pub results: Option<ResultsDocument>,
}

impl RunRecord {
    fn new(run_id: &str, mode: &str, state: &RunState) -> Self {
        Self {
            run_id: run_id.to_string(),
            mode: mode.to_string(),
            repo_url: state.repo_url.clone(),
            team_name: state.team_name.clone(),
            team_leader: state.team_leader.clone(),
            branch_name: state.branch_name.clone(),
            final_status: state.final_status.as_str().to_string(),
            iteration: state.iteration,
            max_iterations: state.max_iterations,
            test_passed: state.test_passed,
            failure_count: 0,
            fix_count: 0,
            commit_count: 0,
            pr_url: None,
            started_at: timestamp(state.started_at),
            ended_at: None,
            pipeline_steps: PIPELINE_STEPS
                .iter()
                .map(|name| PipelineStep {
                    name: (*name).to_string(),
                    status: StepStatus::Pending,
                    detail: String::new(),
                })
                .collect(),
            logs: Vec::new(),
            fixes: Vec::new(),
            results: None,
        }
    }

    fn step_mut(&mut self, name: &str) -> Option<&mut PipelineStep> {
        self.pipeline_steps.iter_mut().find(|s| s.name == name)
    }

    fn push_log(&mut self, level: &str, text: &str) {
        self.logs.push(LogEntry {
            timestamp: timestamp(Utc::now()),
            level: level.to_string(),
            text: text.to_string(),
        });
    }

    fn sync_from(&mut self, state: &RunState) {
        self.final_status = state.final_status.as_str().to_string();
        self.iteration = state.iteration;
        self.test_passed = state.test_passed;
        self.failure_count = state.failures.len();
        self.fix_count = state.fixes.len();
        self.commit_count = state.commits.len();
        self.pr_url = state.pr_url.clone();
        self.ended_at = state.ended_at.map(timestamp);
        self.fixes = state
            .fixes
            .iter()
            .map(|fix| {
                let (before, after) = split_diff_before_after(&fix.diff);
                FixView {
                    file: fix.file.clone(),
                    line: fix.line,
                    bug_type: fix.bug_type.as_str().to_string(),
                    status: match fix.status {
                        FixStatus::Fixed => "FIXED".to_string(),
                        FixStatus::Failed => "FAILED".to_string(),
                    },
                    commit_message: fix.commit_message.clone(),
                    before_snippet: before,
                    after_snippet: after,
                    diff: fix.diff.clone(),
                }
            })
            .collect();
    }
}

/// Lock-guarded map of all runs this process has started.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<String, RunRecord>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh run identifier: `run_<stamp>_<6 alphanumerics>`.
    pub fn new_run_id() -> String {
        const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..6)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();
        format!("run_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), suffix)
    }

    /// Insert a fresh record for a run about to start.
    pub fn register(&self, run_id: &str, mode: &str, state: &RunState) {
        let mut record = RunRecord::new(run_id, mode, state);
        record.push_log("info", "Run accepted");
        self.with_lock(|runs| {
            runs.insert(run_id.to_string(), record);
        });
    }

    /// Last-written snapshot for polling; never blocks on the worker.
    pub fn snapshot(&self, run_id: &str) -> Option<RunRecord> {
        self.with_lock(|runs| runs.get(run_id).cloned())
    }

    pub fn append_log(&self, run_id: &str, level: &str, text: &str) {
        self.with_lock(|runs| {
            if let Some(record) = runs.get_mut(run_id) {
                record.push_log(level, text);
            }
        });
    }

    /// A worker died without reaching finalize: the run is FAILED, any step
    /// still running is failed, and `Done` is failed with a crash note.
    pub fn mark_crashed(&self, run_id: &str) {
        self.with_lock(|runs| {
            let Some(record) = runs.get_mut(run_id) else {
                return;
            };
            record.final_status = FinalStatus::Failed.as_str().to_string();
            record.ended_at = Some(timestamp(Utc::now()));
            for step in &mut record.pipeline_steps {
                if step.status == StepStatus::Running {
                    step.status = StepStatus::Failed;
                }
            }
            if let Some(done) = record.step_mut("Done") {
                done.status = StepStatus::Failed;
                done.detail = "Run crashed".to_string();
            }
            record.push_log("error", "Run crashed");
        });
    }

    /// Attach the final results document once the run completes normally.
    pub fn attach_results(&self, run_id: &str, results: ResultsDocument) {
        self.with_lock(|runs| {
            if let Some(record) = runs.get_mut(run_id) {
                record.results = Some(results);
            }
        });
    }

    fn with_lock<T>(&self, f: impl FnOnce(&mut HashMap<String, RunRecord>) -> T) -> T {
        match self.inner.lock() {
            Ok(mut runs) => f(&mut runs),
            // A poisoned lock means another worker panicked mid-update; the
            // map itself is still a usable snapshot store.
            Err(poisoned) => {
                warn!("registry lock poisoned, continuing with inner map");
                f(&mut poisoned.into_inner())
            }
        }
    }
}

/// Observer wired into the pipeline, translating node events into step and
/// log updates on one run record.
pub struct RegistryObserver {
    registry: Registry,
    run_id: String,
}

impl RegistryObserver {
    pub fn new(registry: Registry, run_id: impl Into<String>) -> Self {
        Self {
            registry,
            run_id: run_id.into(),
        }
    }
}

impl PipelineObserver for RegistryObserver {
    fn on_event(&mut self, event: &NodeEvent<'_>) {
        let step_name = step_for_node(event.node);
        self.registry.with_lock(|runs| {
            let Some(record) = runs.get_mut(&self.run_id) else {
                return;
            };
            record.sync_from(event.state);
            match event.phase {
                EventPhase::NodeStart => {
                    if let Some(step) = record.step_mut(step_name) {
                        step.status = StepStatus::Running;
                        step.detail.clear();
                    }
                    record.push_log("info", &format!("Starting: {step_name}"));
                }
                EventPhase::NodeEnd => {
                    let (status, detail) = step_outcome(event.node, event.state);
                    if let Some(step) = record.step_mut(step_name) {
                        step.status = status;
                        step.detail = detail.clone();
                    }
                    let level = if status == StepStatus::Failed {
                        "error"
                    } else {
                        "info"
                    };
                    record.push_log(level, &format!("{step_name}: {detail}"));
                    if event.node == Node::Finalize {
                        record.results = Some(build_results(event.state));
                    }
                }
            }
        });
    }
}

/// Derive a step's terminal status and one-line detail from run state.
fn step_outcome(node: Node, state: &RunState) -> (StepStatus, String) {
    match node {
        Node::Workspace => {
            if state.workspace.is_some() {
                (StepStatus::Success, "Repository cloned".to_string())
            } else {
                (StepStatus::Failed, "Clone failed".to_string())
            }
        }
        Node::DetectLanguage => match &state.environment {
            Some(env) => (
                StepStatus::Success,
                format!("Detected {}", env.language),
            ),
            None => (StepStatus::Failed, "No supported ecosystem".to_string()),
        },
        Node::Verify => {
            if state.test_passed {
                (StepStatus::Success, "Tests passed".to_string())
            } else {
                (StepStatus::Success, "Tests failing".to_string())
            }
        }
        Node::ClassifyFailures => (
            StepStatus::Success,
            format!("{} failures classified", state.failures.len()),
        ),
        Node::SynthesizeFixes | Node::ApplyChanges => {
            let fixed = state
                .fixes
                .iter()
                .filter(|f| f.status == FixStatus::Fixed)
                .count();
            (
                StepStatus::Success,
                format!("{fixed}/{} fixes applied", state.fixes.len()),
            )
        }
        Node::IntegrateChanges => {
            if state.read_only {
                (StepStatus::Success, "Skipped (read-only)".to_string())
            } else {
                (
                    StepStatus::Success,
                    format!("{} commits on {}", state.commits.len(), state.branch_name),
                )
            }
        }
        Node::OpenPullRequest => match &state.pr_url {
            Some(url) => (StepStatus::Success, url.clone()),
            None if state.read_only => (StepStatus::Success, "Skipped (read-only)".to_string()),
            None => (StepStatus::Success, "No pull request opened".to_string()),
        },
        Node::CiMonitor => (
            StepStatus::Success,
            format!(
                "Iteration {}/{}: {}",
                state.iteration,
                state.max_iterations,
                state.final_status.as_str()
            ),
        ),
        Node::Finalize => {
            if state.final_status == FinalStatus::Passed {
                (
                    StepStatus::Success,
                    format!("PASSED, score {}", state.score.final_score),
                )
            } else {
                (
                    StepStatus::Failed,
                    format!("FAILED, score {}", state.score.final_score),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::EventPhase;

    fn sample_state() -> RunState {
        RunState::new(
            "https://github.com/acme/widgets",
            "Code Warriors",
            "John Doe",
            5,
            false,
            None,
        )
    }

    #[test]
    fn run_ids_have_expected_shape() {
        let id = Registry::new_run_id();
        assert!(id.starts_with("run_"));
        let suffix = id.rsplit('_').next().expect("suffix");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn register_seeds_all_steps_pending() {
        let registry = Registry::new();
        registry.register("run_x", "run-agent", &sample_state());
        let record = registry.snapshot("run_x").expect("record");
        assert_eq!(record.pipeline_steps.len(), PIPELINE_STEPS.len());
        assert!(record
            .pipeline_steps
            .iter()
            .all(|s| s.status == StepStatus::Pending));
        assert_eq!(record.final_status, "RUNNING");
    }

    #[test]
    fn node_events_advance_step_status() {
        let registry = Registry::new();
        let state = sample_state();
        registry.register("run_x", "run-agent", &state);
        let mut observer = RegistryObserver::new(registry.clone(), "run_x");

        observer.on_event(&NodeEvent {
            phase: EventPhase::NodeStart,
            node: Node::Workspace,
            state: &state,
        });
        let record = registry.snapshot("run_x").expect("record");
        assert_eq!(record.pipeline_steps[0].status, StepStatus::Running);

        observer.on_event(&NodeEvent {
            phase: EventPhase::NodeEnd,
            node: Node::Workspace,
            state: &state,
        });
        let record = registry.snapshot("run_x").expect("record");
        // No workspace was attached, so the clone step reports failure.
        assert_eq!(record.pipeline_steps[0].status, StepStatus::Failed);
        assert!(record.logs.len() >= 3);
    }

    #[test]
    fn crash_marks_running_steps_and_done_failed() {
        let registry = Registry::new();
        let state = sample_state();
        registry.register("run_x", "run-agent", &state);
        let mut observer = RegistryObserver::new(registry.clone(), "run_x");
        observer.on_event(&NodeEvent {
            phase: EventPhase::NodeStart,
            node: Node::Verify,
            state: &state,
        });

        registry.mark_crashed("run_x");
        let record = registry.snapshot("run_x").expect("record");
        assert_eq!(record.final_status, "FAILED");
        let verify = record
            .pipeline_steps
            .iter()
            .find(|s| s.name == "Run Tests")
            .expect("step");
        assert_eq!(verify.status, StepStatus::Failed);
        let done = record
            .pipeline_steps
            .iter()
            .find(|s| s.name == "Done")
            .expect("step");
        assert_eq!(done.status, StepStatus::Failed);
        assert_eq!(done.detail, "Run crashed");
    }

    #[test]
    fn fix_views_split_diffs_into_snippets() {
        let registry = Registry::new();
        let mut state = sample_state();
        state.fixes.push(crate::core::types::Fix {
            file: "app.py".to_string(),
            line: 1,
            bug_type: crate::core::types::BugType::Linting,
            commit_message: String::new(),
            status: FixStatus::Fixed,
            diff: "--- a/app.py\n+++ b/app.py\n@@ -1 +1 @@\n-if x == True:\n+if x is True:\n"
                .to_string(),
        });
        registry.register("run_x", "run-agent", &state);
        let mut observer = RegistryObserver::new(registry.clone(), "run_x");
        observer.on_event(&NodeEvent {
            phase: EventPhase::NodeEnd,
            node: Node::ApplyChanges,
            state: &state,
        });

        let record = registry.snapshot("run_x").expect("record");
        assert_eq!(record.fixes.len(), 1);
        assert!(record.fixes[0].before_snippet.contains("== True"));
        assert!(record.fixes[0].after_snippet.contains("is True"));
    }
}
