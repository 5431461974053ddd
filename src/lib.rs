//! Branch Sync - Compare two branches of a GitHub repository and cherry-pick missing commits.
//!
//! This library provides the statechart runtime, the reconciliation of branch
//! histories, and the confirm-then-pick workflow built on both.

pub mod binding;
pub mod config;
pub mod effects;
pub mod github;
pub mod reconcile;
pub mod server;
pub mod statechart;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub mod test_utils;
