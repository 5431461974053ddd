//! Shared test utilities and arbitrary generators for property-based testing.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use crate::types::{Commit, Sha, Signature};

/// Author timestamp of `make_commit(0)`.
const BASE_TIMESTAMP: i64 = 1_700_000_000;

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Builds a deterministic commit. Equal `n` means equal SHA and equal authorship.
pub fn make_commit(n: u64) -> Commit {
    make_commit_at(n, BASE_TIMESTAMP + (n as i64) * 60)
}

/// Builds a deterministic commit with an explicit author timestamp.
pub fn make_commit_at(n: u64, author_secs: i64) -> Commit {
    let date = timestamp(author_secs);
    Commit {
        sha: Sha::new(format!("{:0>40x}", n)),
        author: Signature::new(format!("Author {}", n), format!("author{}@example.com", n), date),
        committer: Signature::new("Committer", "committer@example.com", date),
        message: format!("Commit number {} (#{})", n, n + 100),
        tree: Sha::new(format!("{:0>40x}", n + 1_000_000)),
        parents: vec![Sha::new(format!("{:0>40x}", n + 2_000_000))],
        html_url: None,
        missing: false,
    }
}

/// The same change under a new SHA, as a cherry-pick would produce.
pub fn rewritten(commit: &Commit) -> Commit {
    let tail = commit.sha.as_str().get(1..).unwrap_or("");
    Commit {
        sha: Sha::new(format!("f{}", tail)),
        ..commit.clone()
    }
}

/// A branch history, newest first, with distinct commits.
///
/// Commits are drawn from a small pool so two generated branches overlap, both
/// by SHA and by authorship alone.
pub fn arb_branch() -> impl Strategy<Value = Vec<Commit>> {
    prop::collection::btree_map(0u64..24, any::<bool>(), 0..12).prop_map(|entries| {
        entries
            .into_iter()
            .rev()
            .map(|(n, rewrite)| {
                let commit = make_commit(n);
                if rewrite { rewritten(&commit) } else { commit }
            })
            .collect()
    })
}
