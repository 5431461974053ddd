//! Core domain types for branch synchronisation.
//!
//! This module contains the fundamental types shared by reconciliation, the
//! GitHub effects, and the sync workflow.

pub mod commit;
pub mod ids;

// Re-export commonly used types at the module level
pub use commit::{Commit, PickRequest, Signature};
pub use ids::{RepoId, Sha};
