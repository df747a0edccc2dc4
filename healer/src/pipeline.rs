//! The run loop: an explicit finite-state machine over pipeline nodes.
//!
//! Nodes execute strictly one after another on the calling thread; routing
//! functions return the next node or terminate the loop. Observers are
//! notified before and after every node and must never be able to abort
//! the run.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{info, instrument, warn};

use crate::config::AgentConfig;
use crate::core::classify::{classify_failures, parse_lint_output};
use crate::core::types::{FinalStatus, FixStatus};
use crate::io::detect::detect_environment;
use crate::io::git::{parse_owner_repo, Git};
use crate::io::github::GitHubClient;
use crate::io::patch::{reconcile_with_worktree, synthesize_fixes};
use crate::io::verify::{install_dependencies, run_lint, run_tests, run_verification};
use crate::io::workspace;
use crate::results::{build_results, write_results, ResultsDocument};
use crate::state::RunState;

/// The fixed node set of the healing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Workspace,
    DetectLanguage,
    Verify,
    ClassifyFailures,
    SynthesizeFixes,
    ApplyChanges,
    IntegrateChanges,
    OpenPullRequest,
    CiMonitor,
    Finalize,
}

impl Node {
    pub fn as_str(self) -> &'static str {
        match self {
            Node::Workspace => "workspace",
            Node::DetectLanguage => "detect-language",
            Node::Verify => "verify",
            Node::ClassifyFailures => "classify-failures",
            Node::SynthesizeFixes => "synthesize-fixes",
            Node::ApplyChanges => "apply-changes",
            Node::IntegrateChanges => "integrate-changes",
            Node::OpenPullRequest => "open-pr",
            Node::CiMonitor => "ci-monitor",
            Node::Finalize => "finalize",
        }
    }

    pub fn all() -> [Node; 10] {
        [
            Node::Workspace,
            Node::DetectLanguage,
            Node::Verify,
            Node::ClassifyFailures,
            Node::SynthesizeFixes,
            Node::ApplyChanges,
            Node::IntegrateChanges,
            Node::OpenPullRequest,
            Node::CiMonitor,
            Node::Finalize,
        ]
    }
}

/// Which side of a node the event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    NodeStart,
    NodeEnd,
}

/// Snapshot event delivered around every node execution.
pub struct NodeEvent<'a> {
    pub phase: EventPhase,
    pub node: Node,
    pub state: &'a RunState,
}

/// Receives node transition events. Delivery is guarded; a panicking
/// observer is logged and dropped for that event, never crashing the run.
pub trait PipelineObserver: Send {
    fn on_event(&mut self, event: &NodeEvent<'_>);
}

/// Observer that ignores everything; used by the CLI.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn on_event(&mut self, _event: &NodeEvent<'_>) {}
}

/// Drive a run to completion. The state carries the outcome; the returned
/// document is the same one written to `results.json`.
#[instrument(skip_all, fields(repo = %state.repo_url, branch = %state.branch_name))]
pub fn run_pipeline(
    state: &mut RunState,
    config: &AgentConfig,
    observer: &mut dyn PipelineObserver,
) -> ResultsDocument {
    let mut node = Node::Workspace;
    loop {
        notify(observer, EventPhase::NodeStart, node, state);
        let next = execute_node(node, state, config);
        notify(observer, EventPhase::NodeEnd, node, state);
        match next {
            Some(n) => node = n,
            None => break,
        }
    }
    build_results(state)
}

fn notify(
    observer: &mut dyn PipelineObserver,
    phase: EventPhase,
    node: Node,
    state: &RunState,
) {
    let event = NodeEvent { phase, node, state };
    let delivery = catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
    if delivery.is_err() {
        warn!(node = node.as_str(), "observer panicked during event delivery");
    }
}

fn execute_node(node: Node, state: &mut RunState, config: &AgentConfig) -> Option<Node> {
    match node {
        Node::Workspace => node_workspace(state, config),
        Node::DetectLanguage => node_detect_language(state),
        Node::Verify => node_verify(state, config),
        Node::ClassifyFailures => node_classify_failures(state),
        Node::SynthesizeFixes => node_synthesize_fixes(state),
        Node::ApplyChanges => node_apply_changes(state),
        Node::IntegrateChanges => node_integrate_changes(state, config),
        Node::OpenPullRequest => node_open_pull_request(state),
        Node::CiMonitor => node_ci_monitor(state, config),
        Node::Finalize => node_finalize(state),
    }
}

/// Shallow-clone the repository. Clone failure is fatal to the run.
fn node_workspace(state: &mut RunState, config: &AgentConfig) -> Option<Node> {
    match workspace::clone_repo(
        &state.repo_url,
        state.github_token.as_deref(),
        config.clone_timeout(),
    ) {
        Ok(ws) => {
            let manifest = workspace::scan_structure(ws.path());
            info!(
                tests = manifest.test_files.len(),
                sources = manifest.source_files.len(),
                configs = manifest.config_files.len(),
                "workspace ready"
            );
            state.workspace = Some(ws);
            Some(Node::DetectLanguage)
        }
        Err(err) => {
            warn!(err = %err, "clone failed, terminating run");
            state.final_status = FinalStatus::Failed;
            state.raw_output = format!("Clone failed: {err}");
            Some(Node::Finalize)
        }
    }
}

/// Pick the dominant ecosystem. No ecosystem is fatal to the run.
fn node_detect_language(state: &mut RunState) -> Option<Node> {
    let Some(root) = state.workspace_root() else {
        state.final_status = FinalStatus::Failed;
        return Some(Node::Finalize);
    };
    let env = detect_environment(root);
    if env.is_unknown() {
        warn!("no supported ecosystem detected, terminating run");
        state.final_status = FinalStatus::Failed;
        state.raw_output = "No supported ecosystem detected".to_string();
        return Some(Node::Finalize);
    }
    info!(language = %env.language, "ecosystem detected");
    state.environment = Some(env);
    Some(Node::Verify)
}

/// One verification pass: install dependencies once, then lint + tests.
fn node_verify(state: &mut RunState, config: &AgentConfig) -> Option<Node> {
    let (Some(root), Some(env)) = (
        state.workspace.as_ref().map(|w| w.path().to_path_buf()),
        state.environment.clone(),
    ) else {
        state.final_status = FinalStatus::Failed;
        return Some(Node::Finalize);
    };

    if !state.deps_installed {
        install_dependencies(&root, &env.language, config);
        state.deps_installed = true;
    }

    let verification = run_verification(&root, &env, config);
    state.test_passed = verification.test_passed;
    state.raw_output = verification.raw_output;
    state.record_ci_run(if state.test_passed {
        FinalStatus::Passed
    } else {
        FinalStatus::Failed
    });

    if state.test_passed {
        Some(Node::CiMonitor)
    } else {
        Some(Node::ClassifyFailures)
    }
}

/// Replace the failure list wholesale from the last verification output.
fn node_classify_failures(state: &mut RunState) -> Option<Node> {
    state.failures = classify_failures(&state.raw_output);
    info!(failures = state.failures.len(), "failures classified");
    Some(Node::SynthesizeFixes)
}

/// Replace the fix list wholesale for this iteration.
fn node_synthesize_fixes(state: &mut RunState) -> Option<Node> {
    let Some(root) = state.workspace.as_ref().map(|w| w.path().to_path_buf()) else {
        state.final_status = FinalStatus::Failed;
        return Some(Node::Finalize);
    };
    state.fixes = synthesize_fixes(&root, &state.failures, &state.raw_output);
    Some(Node::ApplyChanges)
}

/// Reconcile claimed fixes against actual working-tree deltas before
/// anything is committed.
fn node_apply_changes(state: &mut RunState) -> Option<Node> {
    if let Some(root) = state.workspace.as_ref().map(|w| w.path().to_path_buf()) {
        reconcile_with_worktree(&root, &mut state.fixes);
    }
    Some(Node::IntegrateChanges)
}

/// Branch, stage, commit, and force-push. Push failure is recoverable;
/// a missing git repository at commit time is fatal.
fn node_integrate_changes(state: &mut RunState, config: &AgentConfig) -> Option<Node> {
    if state.read_only {
        info!("read-only mode, skipping commit and push");
        return Some(Node::OpenPullRequest);
    }
    let Some(root) = state.workspace.as_ref().map(|w| w.path().to_path_buf()) else {
        state.final_status = FinalStatus::Failed;
        return Some(Node::Finalize);
    };

    let git = Git::new(&root);
    if !git.is_repository() {
        warn!("workspace is not a git repository, terminating run");
        state.final_status = FinalStatus::Failed;
        return Some(Node::Finalize);
    }

    let outcome = (|| -> anyhow::Result<Option<String>> {
        git.ensure_branch(&state.branch_name)?;
        git.add_all()?;
        git.commit_staged(&commit_message(state))
    })();

    match outcome {
        Ok(Some(sha)) => {
            info!(sha = %sha, "changes committed");
            state.commits.push(sha);
            if let Some(token) = state.github_token.clone() {
                if let Err(err) =
                    git.push_with_token(&state.branch_name, &token, config.push_timeout())
                {
                    warn!(err = %err, "push failed, continuing");
                }
            }
        }
        Ok(None) => info!("nothing staged, integration is a no-op"),
        Err(err) => warn!(err = %err, "integration failed, continuing"),
    }
    Some(Node::OpenPullRequest)
}

/// Single commit message per integration pass.
fn commit_message(state: &RunState) -> String {
    let fixed: Vec<_> = state
        .fixes
        .iter()
        .filter(|f| f.status == FixStatus::Fixed)
        .collect();
    if fixed.len() == 1 {
        return fixed[0].commit_message.clone();
    }
    let mut files: Vec<&str> = fixed.iter().map(|f| f.file.as_str()).collect();
    files.sort_unstable();
    files.dedup();
    format!(
        "[AI-AGENT] Fix {} issues across {} files",
        fixed.len(),
        files.len()
    )
}

/// Open (or reuse) the pull request. Every failure here is recoverable.
fn node_open_pull_request(state: &mut RunState) -> Option<Node> {
    if state.read_only || state.pr_url.is_some() || state.commits.is_empty() {
        return Some(Node::CiMonitor);
    }
    let Some(token) = state.github_token.clone() else {
        return Some(Node::CiMonitor);
    };
    let Some((owner, repo)) = parse_owner_repo(&state.repo_url) else {
        warn!("cannot parse owner/repo from repository URL, skipping PR");
        return Some(Node::CiMonitor);
    };

    let outcome = (|| -> anyhow::Result<String> {
        let client = GitHubClient::new(&token)?;
        if let Some(existing) = client.find_open_pull_request(&owner, &repo, &state.branch_name)? {
            info!(url = %existing, "reusing open pull request");
            return Ok(existing);
        }
        let base = client.default_branch(&owner, &repo);
        let fixed = state
            .fixes
            .iter()
            .filter(|f| f.status == FixStatus::Fixed)
            .count();
        client.create_pull_request(
            &owner,
            &repo,
            &state.branch_name,
            &base,
            &format!("[AI-AGENT] Auto-fix: {fixed} issues fixed"),
            &pull_request_body(state),
        )
    })();

    match outcome {
        Ok(url) => state.pr_url = Some(url),
        Err(err) => warn!(err = %err, "pull request step failed, continuing"),
    }
    Some(Node::CiMonitor)
}

fn pull_request_body(state: &RunState) -> String {
    // The run is still in flight when the PR opens, so score is a snapshot
    // of the rules applied to the elapsed time and commits so far.
    let mut score = state.score.clone();
    score.compute(state.total_seconds(), state.commits.len());

    let mut body = String::from("## Automated CI fixes\n\n");
    body.push_str(&format!("- Team: {}\n", state.team_name));
    body.push_str(&format!("- Leader: {}\n", state.team_leader));
    body.push_str(&format!("- Branch: `{}`\n", state.branch_name));
    body.push_str(&format!("- Status: {}\n", state.final_status.as_str()));
    body.push_str(&format!("- Iteration: {}/{}\n", state.iteration, state.max_iterations));
    body.push_str(&format!("- Score: {}\n\n", score.final_score));
    body.push_str("### Fixes applied\n\n");
    for fix in state.fixes.iter().filter(|f| f.status == FixStatus::Fixed) {
        body.push_str(&format!(
            "- `{}` line {}: {}\n",
            fix.file,
            fix.line,
            fix.bug_type.as_str()
        ));
    }
    body
}

/// Increment the iteration, re-run tests (plus lint only when a pending
/// failure is lint-related), and decide whether the loop continues.
fn node_ci_monitor(state: &mut RunState, config: &AgentConfig) -> Option<Node> {
    state.iteration += 1;

    let (Some(root), Some(env)) = (
        state.workspace.as_ref().map(|w| w.path().to_path_buf()),
        state.environment.clone(),
    ) else {
        state.final_status = FinalStatus::Failed;
        return Some(Node::Finalize);
    };

    let recheck_lint = state.failures.iter().any(|f| f.bug_type.is_lint_related());
    let mut lint_clean = true;
    let mut sections = Vec::new();

    if recheck_lint {
        if let Some(lint_cmd) = &env.lint_command {
            let output = run_lint(lint_cmd, &root, config);
            lint_clean = parse_lint_output(&output).is_empty();
            if !output.is_empty() {
                sections.push(output);
            }
        }
    }

    let test_passed = match &env.test_command {
        Some(test_cmd) => {
            let (output, passed) = run_tests(test_cmd, &root, config);
            if !output.is_empty() {
                sections.push(output);
            }
            passed
        }
        None => false,
    };

    state.test_passed = test_passed;
    state.raw_output = sections.join("\n").trim().to_string();
    state.record_ci_run(if test_passed && lint_clean {
        FinalStatus::Passed
    } else {
        FinalStatus::Failed
    });

    if test_passed && lint_clean {
        info!(iteration = state.iteration, "all green");
        state.final_status = FinalStatus::Passed;
        return Some(Node::Finalize);
    }
    if state.iteration >= state.max_iterations {
        warn!(iteration = state.iteration, "iteration budget exhausted");
        state.final_status = FinalStatus::Failed;
        return Some(Node::Finalize);
    }
    info!(iteration = state.iteration, "still failing, looping");
    Some(Node::Verify)
}

/// Record the end time, settle a still-running status from the last test
/// result, compute the score once, and write the results document.
fn node_finalize(state: &mut RunState) -> Option<Node> {
    state.ended_at = Some(chrono::Utc::now());
    if state.final_status == FinalStatus::Running {
        state.final_status = if state.test_passed {
            FinalStatus::Passed
        } else {
            FinalStatus::Failed
        };
    }
    state
        .score
        .compute(state.total_seconds(), state.commits.len());

    let document = build_results(state);
    if let Some(root) = state.workspace_root() {
        if let Err(err) = write_results(root, &document) {
            warn!(err = %err, "could not persist results document");
        }
    }
    info!(
        status = state.final_status.as_str(),
        score = state.score.final_score,
        iterations = state.iteration,
        "run finished"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_names_are_stable() {
        let names: Vec<&str> = Node::all().iter().map(|n| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "workspace",
                "detect-language",
                "verify",
                "classify-failures",
                "synthesize-fixes",
                "apply-changes",
                "integrate-changes",
                "open-pr",
                "ci-monitor",
                "finalize",
            ]
        );
    }

    #[test]
    fn commit_message_single_fix_uses_its_message() {
        let mut state = RunState::new("https://github.com/a/b", "T", "L", 5, false, None);
        state.fixes.push(crate::core::types::Fix {
            file: "app.py".to_string(),
            line: 3,
            bug_type: crate::core::types::BugType::Linting,
            commit_message: "[AI-AGENT] Fix LINTING in app.py line 3".to_string(),
            status: FixStatus::Fixed,
            diff: String::new(),
        });
        assert_eq!(commit_message(&state), "[AI-AGENT] Fix LINTING in app.py line 3");
    }

    #[test]
    fn commit_message_summarizes_multiple_fixes() {
        let mut state = RunState::new("https://github.com/a/b", "T", "L", 5, false, None);
        for (file, line) in [("a.py", 1), ("a.py", 5), ("b.py", 2)] {
            state.fixes.push(crate::core::types::Fix {
                file: file.to_string(),
                line,
                bug_type: crate::core::types::BugType::Linting,
                commit_message: String::new(),
                status: FixStatus::Fixed,
                diff: String::new(),
            });
        }
        assert_eq!(commit_message(&state), "[AI-AGENT] Fix 3 issues across 2 files");
    }

    #[test]
    fn pull_request_body_carries_run_summary_fields() {
        let mut state =
            RunState::new("https://github.com/a/b", "Code Warriors", "John Doe", 5, false, None);
        state.iteration = 2;
        state.fixes.push(crate::core::types::Fix {
            file: "app.py".to_string(),
            line: 3,
            bug_type: crate::core::types::BugType::Linting,
            commit_message: String::new(),
            status: FixStatus::Fixed,
            diff: String::new(),
        });

        let body = pull_request_body(&state);
        assert!(body.contains("- Team: Code Warriors\n"));
        assert!(body.contains("- Leader: John Doe\n"));
        assert!(body.contains("- Branch: `CODE_WARRIORS_JOHN_DOE_AI_Fix`\n"));
        assert!(body.contains("- Status: RUNNING\n"));
        assert!(body.contains("- Iteration: 2/5\n"));
        // Fresh run, no commits: base 100 plus the under-five-minutes bonus.
        assert!(body.contains("- Score: 110\n"));
        assert!(body.contains("- `app.py` line 3: LINTING\n"));
    }

    #[test]
    fn panicking_observer_does_not_abort_delivery() {
        struct Exploding;
        impl PipelineObserver for Exploding {
            fn on_event(&mut self, _event: &NodeEvent<'_>) {
                panic!("listener bug");
            }
        }
        let state = RunState::new("https://github.com/a/b", "T", "L", 5, false, None);
        let mut observer = Exploding;
        notify(&mut observer, EventPhase::NodeStart, Node::Verify, &state);
    }
}
