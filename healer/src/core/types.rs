//! Shared deterministic types for the healing pipeline.
//!
//! These types define stable contracts between pipeline nodes. They must not
//! depend on external state or I/O and must serialize identically across runs.

use serde::{Deserialize, Serialize};

/// Branch suffix appended to every derived branch name.
pub const BRANCH_SUFFIX: &str = "AI_Fix";

/// Wall-clock threshold (seconds) under which the speed bonus applies.
pub const SPEED_BONUS_THRESHOLD_SECS: f64 = 300.0;

/// Closed set of failure categories the fix catalogue understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BugType {
    Linting,
    Syntax,
    Logic,
    TypeError,
    Import,
    Indentation,
}

impl BugType {
    pub fn as_str(self) -> &'static str {
        match self {
            BugType::Linting => "LINTING",
            BugType::Syntax => "SYNTAX",
            BugType::Logic => "LOGIC",
            BugType::TypeError => "TYPE_ERROR",
            BugType::Import => "IMPORT",
            BugType::Indentation => "INDENTATION",
        }
    }

    /// True for categories surfaced by the linter rather than the test suite.
    pub fn is_lint_related(self) -> bool {
        matches!(
            self,
            BugType::Linting | BugType::Import | BugType::Indentation
        )
    }
}

/// A single classified problem at a specific file/line, pre-fix.
///
/// `description` always retains the originating tool's error code when one was
/// present (e.g. `"E302 expected 2 blank lines, found 1"`); the fix catalogue
/// keys its per-code micro-fixes off that prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub file: String,
    pub line: usize,
    pub bug_type: BugType,
    pub description: String,
}

impl Failure {
    /// Render the exact-format evaluation line for this failure:
    /// `"<bugType> error in <file> line <line> → Fix: <action>"`.
    pub fn to_agent_output(&self) -> String {
        let action = readable_fix(&self.description, self.bug_type);
        format!(
            "{} error in {} line {} → Fix: {}",
            self.bug_type.as_str(),
            self.file,
            self.line,
            action
        )
    }
}

/// Outcome of one attempted fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixStatus {
    Fixed,
    Failed,
}

/// The outcome (attempted or applied) of patch synthesis for one failure.
///
/// A FAILED fix never altered the workspace; its `diff` field carries the
/// rejection reason instead of a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    pub file: String,
    pub line: usize,
    pub bug_type: BugType,
    pub commit_message: String,
    pub status: FixStatus,
    pub diff: String,
}

impl Fix {
    /// Standard commit message for a single fix.
    pub fn commit_message_for(bug_type: BugType, file: &str, line: usize) -> String {
        format!("[AI-AGENT] Fix {} in {file} line {line}", bug_type.as_str())
    }
}

/// Terminal pipeline status. `Running` is loop-internal only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Running,
    Passed,
    Failed,
}

impl FinalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FinalStatus::Running => "RUNNING",
            FinalStatus::Passed => "PASSED",
            FinalStatus::Failed => "FAILED",
        }
    }
}

/// One audit-trail entry per verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiRun {
    pub iteration: u32,
    pub status: FinalStatus,
    pub timestamp: String,
}

/// Score breakdown computed exactly once, at finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base_score: i32,
    pub speed_bonus: i32,
    pub efficiency_penalty: i32,
    pub final_score: i32,
}

impl Default for ScoreBreakdown {
    fn default() -> Self {
        Self {
            base_score: 100,
            speed_bonus: 0,
            efficiency_penalty: 0,
            final_score: 100,
        }
    }
}

impl ScoreBreakdown {
    /// Apply the scoring rules: +10 when total wall time is under five
    /// minutes, -2 per commit beyond the 20th, floored at zero.
    pub fn compute(&mut self, total_time_seconds: f64, total_commits: usize) {
        if total_time_seconds < SPEED_BONUS_THRESHOLD_SECS {
            self.speed_bonus = 10;
        }
        let excess = total_commits.saturating_sub(20);
        self.efficiency_penalty = (excess * 2) as i32;
        self.final_score = (self.base_score + self.speed_bonus - self.efficiency_penalty).max(0);
    }
}

/// Derive the dedicated branch name from team and leader.
///
/// Pure and stable: uppercased, spaces replaced with underscores, fixed
/// suffix. `Code Warriors` + `John Doe` → `CODE_WARRIORS_JOHN_DOE_AI_Fix`.
pub fn branch_name(team_name: &str, team_leader: &str) -> String {
    let team = team_name.trim().to_uppercase().replace(' ', "_");
    let leader = team_leader.trim().to_uppercase().replace(' ', "_");
    format!("{team}_{leader}_{BRANCH_SUFFIX}")
}

/// Look up the human-readable fix action for an error code embedded in a
/// failure description, with bug-type fallbacks when no code matches.
fn readable_fix(description: &str, bug_type: BugType) -> &'static str {
    let code = leading_code(description);
    match code {
        "E302" => return "add 2 blank lines before function definition",
        "E303" => return "remove extra blank lines",
        "W391" => return "remove blank line at end of file",
        "W292" => return "add newline at end of file",
        "W291" | "W293" => return "remove trailing whitespace",
        "E712" => return "use 'is True' instead of '== True'",
        "E711" => return "use 'is None' instead of '== None'",
        "F401" => return "remove the unused import statement",
        "E501" => return "shorten the line to under 120 characters",
        "E999" => return "fix the syntax error at this line",
        "F841" => return "remove or use the assigned variable",
        "E401" => return "split into separate import statements",
        "E111" => return "fix indentation to use 4 spaces",
        "E117" => return "fix over-indented code",
        _ => {}
    }

    let lower = description.to_lowercase();
    match bug_type {
        BugType::Import => "remove the import statement",
        BugType::Syntax => "fix the syntax error at this line",
        BugType::Indentation => "correct the indentation",
        BugType::Logic => "fix the logic error",
        _ if lower.contains("blank line") => "fix the blank line spacing",
        _ if lower.contains("unused") => "remove the unused import statement",
        _ => "fix the linting issue",
    }
}

/// Extract a leading tool code (`E302`, `W391`, ...) from a description.
pub fn leading_code(description: &str) -> &str {
    let trimmed = description.trim_start();
    let end = trimmed
        .char_indices()
        .take_while(|(i, c)| {
            if *i == 0 {
                c.is_ascii_uppercase()
            } else {
                c.is_ascii_digit()
            }
        })
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    // A code is one uppercase letter followed by at least one digit.
    if end >= 2 {
        &trimmed[..end]
    } else {
        ""
    }
}
