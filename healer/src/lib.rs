//! Self-healing CI pipeline agent.
//!
//! Given a repository URL, the agent clones it, runs its lint and test
//! tooling, classifies failures into a small closed taxonomy, synthesizes
//! line-level patches, commits and pushes them to a dedicated branch, opens
//! a pull request, and re-verifies in a bounded loop. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, fix
//!   strategies, scoring, diff splitting). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (processes, workspaces, git,
//!   GitHub API). Every external call is bounded by a timeout.
//!
//! [`pipeline`] wires both into an explicit node state machine; [`registry`]
//! tracks concurrent runs and relays node-level progress to pollers.

pub mod config;
pub mod core;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod results;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
