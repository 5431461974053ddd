//! Commit records as fetched from (and written to) the remote repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::Sha;

/// Who authored or committed a commit, and when.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub date: DateTime<Utc>,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, date: DateTime<Utc>) -> Self {
        Signature {
            name: name.into(),
            email: email.into(),
            date,
        }
    }
}

/// A single commit on a branch.
///
/// Commits are never mutated after they are fetched. Reconciliation produces
/// flagged copies, and a cherry-pick produces a brand new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: Sha,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
    /// The tree this commit points at.
    pub tree: Sha,
    pub parents: Vec<Sha>,
    /// Link to the commit on the web, when the API provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    /// Set only by reconciliation: present on the source branch, absent from the target.
    #[serde(default)]
    pub missing: bool,
}

impl Commit {
    /// Returns a copy of this commit flagged as missing from the target branch.
    pub fn as_missing(&self) -> Commit {
        Commit {
            missing: true,
            ..self.clone()
        }
    }

    /// The first line of the commit message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// A request to cherry-pick one missing commit onto the target branch.
///
/// Carried by the `confirmPick` event, through the confirmation actor, and into
/// the pick service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickRequest {
    pub sha: Sha,
    pub commit: Commit,
}

impl PickRequest {
    pub fn new(commit: Commit) -> Self {
        PickRequest {
            sha: commit.sha.clone(),
            commit,
        }
    }
}
