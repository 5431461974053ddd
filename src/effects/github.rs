//! GitHub API effect types.
//!
//! Each effect describes one API operation as data. The interpreter executes
//! it; the workflow services only build effects and read responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Commit, Sha, Signature};

/// A GitHub API effect, scoped to the interpreter's repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitHubEffect {
    // ─── Reads ────────────────────────────────────────────────────────────────
    /// List the history of `branch`, newest first.
    ListCommits {
        branch: String,
        /// Only commits authored at or after this instant.
        since: Option<DateTime<Utc>>,
        /// Stop after this many commits.
        max_count: usize,
    },

    // ─── Writes ───────────────────────────────────────────────────────────────
    /// Create a commit object. Does not move any branch.
    CreateCommit {
        message: String,
        tree: Sha,
        author: Signature,
        committer: Signature,
        parents: Vec<Sha>,
    },

    /// Move `heads/<branch>` to `sha`. Never forced.
    UpdateRef { branch: String, sha: Sha },
}

impl GitHubEffect {
    /// True if executing this effect twice is indistinguishable from once.
    pub fn is_idempotent(&self) -> bool {
        match self {
            GitHubEffect::ListCommits { .. } => true,
            // A second CreateCommit yields a distinct object with a new committer
            // date; a second UpdateRef may race a concurrent push.
            GitHubEffect::CreateCommit { .. } | GitHubEffect::UpdateRef { .. } => false,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            GitHubEffect::ListCommits { .. } => "list_commits",
            GitHubEffect::CreateCommit { .. } => "create_commit",
            GitHubEffect::UpdateRef { .. } => "update_ref",
        }
    }
}

/// The response to a `GitHubEffect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GitHubResponse {
    /// Response to `ListCommits`, newest first.
    Commits(Vec<Commit>),

    /// Response to `CreateCommit`.
    Commit(Commit),

    /// Response to `UpdateRef`.
    RefUpdated { sha: Sha },
}
