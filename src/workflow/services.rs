//! The workflow's asynchronous services.
//!
//! Both services only build `GitHubEffect`s and read the responses, so they run
//! unchanged against the real client and against test mocks.

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument};

use crate::effects::{GitHubEffect, GitHubInterpreter, GitHubResponse};
use crate::github::GitHubApiError;
use crate::reconcile::{Reconciliation, reconcile};
use crate::types::{Commit, PickRequest, Sha};

use super::{SyncError, SyncOptions};

/// Lists the recent history of a branch.
async fn list_commits<G>(
    github: &G,
    branch: &str,
    options: &SyncOptions,
) -> Result<Vec<Commit>, SyncError>
where
    G: GitHubInterpreter<Error = GitHubApiError>,
{
    let effect = GitHubEffect::ListCommits {
        branch: branch.to_string(),
        since: Some(Utc::now() - Duration::days(i64::from(options.lookback_days))),
        max_count: options.max_commits,
    };

    match github.interpret(effect).await {
        Ok(GitHubResponse::Commits(commits)) => Ok(commits),
        Ok(_) => Err(SyncError::UnexpectedResponse("list_commits")),
        Err(source) => Err(SyncError::Fetch {
            branch: branch.to_string(),
            source,
        }),
    }
}

/// Fetches both branches concurrently and reconciles them.
#[instrument(skip_all, fields(source = %options.source, target = %options.target))]
pub async fn load_commits<G>(github: &G, options: &SyncOptions) -> Result<Reconciliation, SyncError>
where
    G: GitHubInterpreter<Error = GitHubApiError>,
{
    let (source, target) = tokio::join!(
        list_commits(github, &options.source, options),
        list_commits(github, &options.target, options),
    );

    let reconciliation = reconcile(source?, target?);
    info!(
        missing = reconciliation.missing().count(),
        "Loaded branch histories"
    );
    Ok(reconciliation)
}

/// Recreates `request` on top of `parent` and moves `heads/<target>` to it.
///
/// The new commit keeps the message, tree and both signatures of the original.
/// The ref update is never forced, so a target that moved since it was loaded
/// fails with a conflict instead of losing commits.
#[instrument(skip_all, fields(branch = %target, sha = %request.sha))]
pub async fn cherry_pick<G>(
    github: &G,
    target: &str,
    parent: Option<&Sha>,
    request: &PickRequest,
) -> Result<Commit, SyncError>
where
    G: GitHubInterpreter<Error = GitHubApiError>,
{
    let parent = parent.ok_or_else(|| SyncError::NoTargetHead(target.to_string()))?;
    let original = &request.commit;
    let write_error = |source| SyncError::Write {
        sha: request.sha.clone(),
        source,
    };

    let created = match github
        .interpret(GitHubEffect::CreateCommit {
            message: original.message.clone(),
            tree: original.tree.clone(),
            author: original.author.clone(),
            committer: original.committer.clone(),
            parents: vec![parent.clone()],
        })
        .await
        .map_err(write_error)?
    {
        GitHubResponse::Commit(commit) => commit,
        _ => return Err(SyncError::UnexpectedResponse("create_commit")),
    };
    debug!(created = %created.sha, parent = %parent, "Created commit");

    match github
        .interpret(GitHubEffect::UpdateRef {
            branch: target.to_string(),
            sha: created.sha.clone(),
        })
        .await
        .map_err(write_error)?
    {
        GitHubResponse::RefUpdated { .. } => {}
        _ => return Err(SyncError::UnexpectedResponse("update_ref")),
    }

    info!(created = %created.sha.short(), "Cherry-picked commit onto target");
    Ok(created)
}
