//! Pure, deterministic logic: classification, fix strategies, scoring.
//!
//! Nothing in this module performs I/O; everything is testable in isolation
//! and must stay deterministic across runs.

pub mod classify;
pub mod diffsplit;
pub mod repair;
pub mod strategies;
pub mod types;
