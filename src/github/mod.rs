//! GitHub API client and effect interpreter.
//!
//! Implements `GitHubInterpreter` for a repository-scoped octocrab client:
//!
//! - Commit listing with pagination, retried on transient failures
//! - Commit creation and non-forced ref updates, attempted once
//! - Failures classified as transient, permanent or conflict

mod client;
mod error;
mod interpreter;
mod retry;

pub use client::OctocrabClient;
pub use error::{GitHubApiError, GitHubErrorKind};
pub use interpreter::interpret_github_effect;
pub use retry::{RetryConfig, RetryPolicy};
