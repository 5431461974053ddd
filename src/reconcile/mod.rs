//! Branch reconciliation.
//!
//! Computes which commits of a source branch are absent from a target branch.
//! Two commits are considered the same if their SHAs match, or if their author
//! name, email and timestamp all match. The latter catches commits that were
//! cherry-picked (and therefore got a new SHA) but kept their authorship.
//!
//! Everything here is pure: no I/O, and the output depends only on the inputs.

use serde::{Deserialize, Serialize};

use crate::types::{Commit, Sha};

/// The result of reconciling two branches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reconciliation {
    /// The source branch history, exactly as fetched.
    pub source: Vec<Commit>,

    /// Source commits missing from the target (flagged `missing`, in source order),
    /// followed by the real target history.
    pub target: Vec<Commit>,
}

/// Returns true if two commits represent the same change.
pub fn same_commit(a: &Commit, b: &Commit) -> bool {
    a.sha == b.sha
        || (a.author.name == b.author.name
            && a.author.email == b.author.email
            && a.author.date == b.author.date)
}

/// Reconciles `source` against `target`.
///
/// Duplicate SHAs within either input are passed through untouched.
pub fn reconcile(source: Vec<Commit>, target: Vec<Commit>) -> Reconciliation {
    let mut merged: Vec<Commit> = source
        .iter()
        .filter(|commit| !target.iter().any(|other| same_commit(other, commit)))
        .map(Commit::as_missing)
        .collect();

    let missing = merged.len();
    merged.extend(target);

    tracing::debug!(
        source = source.len(),
        target = merged.len() - missing,
        missing,
        "Reconciled branches"
    );

    Reconciliation {
        source,
        target: merged,
    }
}

impl Reconciliation {
    /// The newest commit that really exists on the target branch.
    ///
    /// This is the parent for any commit cherry-picked onto the target.
    pub fn target_head(&self) -> Option<&Commit> {
        self.target.iter().find(|c| !c.missing)
    }

    /// All placeholder commits, in source order.
    pub fn missing(&self) -> impl Iterator<Item = &Commit> {
        self.target.iter().filter(|c| c.missing)
    }

    /// Finds the placeholder for `sha`, if that commit is missing from the target.
    pub fn find_missing(&self, sha: &Sha) -> Option<&Commit> {
        self.missing().find(|c| &c.sha == sha)
    }

    /// Returns a new reconciliation with every target entry whose SHA is `sha`
    /// replaced by `commit`.
    pub fn replace_commit(&self, sha: &Sha, commit: Commit) -> Reconciliation {
        let target = self
            .target
            .iter()
            .map(|c| {
                if &c.sha == sha {
                    commit.clone()
                } else {
                    c.clone()
                }
            })
            .collect();

        Reconciliation {
            source: self.source.clone(),
            target,
        }
    }
}
