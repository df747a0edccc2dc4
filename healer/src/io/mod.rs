//! Side-effecting adapters: processes, filesystem, git, GitHub.

pub mod command;
pub mod detect;
pub mod git;
pub mod github;
pub mod patch;
pub mod verify;
pub mod workspace;
