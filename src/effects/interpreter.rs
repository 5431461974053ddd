//! Effect interpreter trait.

use std::future::Future;

use super::github::{GitHubEffect, GitHubResponse};

/// Interprets GitHub effects against some backend.
///
/// Implementations are scoped to one repository. `OctocrabClient` talks to
/// the real API; tests use in-memory mocks.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct FixedCommits(Vec<Commit>);
///
/// impl GitHubInterpreter for FixedCommits {
///     type Error = GitHubApiError;
///
///     async fn interpret(&self, effect: GitHubEffect) -> Result<GitHubResponse, Self::Error> {
///         match effect {
///             GitHubEffect::ListCommits { .. } => Ok(GitHubResponse::Commits(self.0.clone())),
///             other => Err(GitHubApiError::permanent_without_source(format!("{:?}", other))),
///         }
///     }
/// }
/// ```
pub trait GitHubInterpreter {
    type Error;

    /// Execute a GitHub effect and return its response.
    fn interpret(
        &self,
        effect: GitHubEffect,
    ) -> impl Future<Output = Result<GitHubResponse, Self::Error>> + Send;
}
