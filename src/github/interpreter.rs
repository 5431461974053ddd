//! GitHub effect interpreter using octocrab.
//!
//! All three operations go through octocrab's raw REST helpers
//! (`get`/`post`/`patch`) with local wire types. The typed builders don't
//! expose the git-data endpoints with the fields we need.
//!
//! Reads are retried on transient errors. Writes are attempted once: creating
//! a commit is not idempotent, and a ref update is only safe against the state
//! it was computed from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::effects::{GitHubEffect, GitHubInterpreter, GitHubResponse};
use crate::types::{Commit, Sha, Signature};

use super::client::OctocrabClient;
use super::error::{GitHubApiError, is_ref_conflict};
use super::retry::{RetryConfig, RetryPolicy, RetryResult, retry_with_backoff};

/// GitHub's maximum page size for commit listings.
const PAGE_SIZE: usize = 100;

// ─── Interpreter Implementation ───────────────────────────────────────────────

impl GitHubInterpreter for OctocrabClient {
    type Error = GitHubApiError;

    async fn interpret(&self, effect: GitHubEffect) -> Result<GitHubResponse, Self::Error> {
        let policy = if effect.is_idempotent() {
            RetryPolicy::RetryTransient
        } else {
            RetryPolicy::NoRetry
        };
        interpret_github_effect(self, effect, RetryConfig::DEFAULT, policy).await
    }
}

/// Executes `effect` with the given retry behaviour.
#[instrument(skip_all, fields(repo = %client.repo(), effect = effect.name()))]
pub async fn interpret_github_effect(
    client: &OctocrabClient,
    effect: GitHubEffect,
    retry_config: RetryConfig,
    retry_policy: RetryPolicy,
) -> Result<GitHubResponse, GitHubApiError> {
    let result = retry_with_backoff(retry_config, retry_policy, || {
        execute_effect(client, effect.clone())
    })
    .await;

    if let RetryResult::ExhaustedRetries {
        last_error,
        attempts,
    } = &result
    {
        warn!(attempts, error = %last_error, "Giving up after transient failures");
    }
    result.into_result()
}

async fn execute_effect(
    client: &OctocrabClient,
    effect: GitHubEffect,
) -> Result<GitHubResponse, GitHubApiError> {
    match effect {
        GitHubEffect::ListCommits {
            branch,
            since,
            max_count,
        } => list_commits(client, &branch, since, max_count).await,
        GitHubEffect::CreateCommit {
            message,
            tree,
            author,
            committer,
            parents,
        } => {
            let request = CreateCommitRequest {
                message: &message,
                tree: tree.as_str(),
                parents: parents.iter().map(Sha::as_str).collect(),
                author: WireSignature::from(&author),
                committer: WireSignature::from(&committer),
            };
            create_commit(client, &request).await
        }
        GitHubEffect::UpdateRef { branch, sha } => update_ref(client, &branch, sha).await,
    }
}

// ─── Wire Types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct WireSignature {
    name: String,
    email: String,
    date: DateTime<Utc>,
}

impl From<&Signature> for WireSignature {
    fn from(s: &Signature) -> Self {
        WireSignature {
            name: s.name.clone(),
            email: s.email.clone(),
            date: s.date,
        }
    }
}

impl From<WireSignature> for Signature {
    fn from(s: WireSignature) -> Self {
        Signature::new(s.name, s.email, s.date)
    }
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

/// The git-level part of a commit as returned by the commits API.
#[derive(Debug, Deserialize)]
struct GitCommitBody {
    author: WireSignature,
    committer: WireSignature,
    message: String,
    tree: ShaRef,
}

/// An entry of `GET /repos/{owner}/{repo}/commits`.
#[derive(Debug, Deserialize)]
struct ListedCommit {
    sha: String,
    html_url: Option<String>,
    commit: GitCommitBody,
    #[serde(default)]
    parents: Vec<ShaRef>,
}

impl From<ListedCommit> for Commit {
    fn from(c: ListedCommit) -> Self {
        Commit {
            sha: Sha::new(c.sha),
            author: c.commit.author.into(),
            committer: c.commit.committer.into(),
            message: c.commit.message,
            tree: Sha::new(c.commit.tree.sha),
            parents: c.parents.into_iter().map(|p| Sha::new(p.sha)).collect(),
            html_url: c.html_url,
            missing: false,
        }
    }
}

/// The response of `POST /repos/{owner}/{repo}/git/commits`.
#[derive(Debug, Deserialize)]
struct CreatedCommit {
    sha: String,
    html_url: Option<String>,
    author: WireSignature,
    committer: WireSignature,
    message: String,
    tree: ShaRef,
    #[serde(default)]
    parents: Vec<ShaRef>,
}

impl From<CreatedCommit> for Commit {
    fn from(c: CreatedCommit) -> Self {
        Commit {
            sha: Sha::new(c.sha),
            author: c.author.into(),
            committer: c.committer.into(),
            message: c.message,
            tree: Sha::new(c.tree.sha),
            parents: c.parents.into_iter().map(|p| Sha::new(p.sha)).collect(),
            html_url: c.html_url,
            missing: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateCommitRequest<'a> {
    message: &'a str,
    tree: &'a str,
    parents: Vec<&'a str>,
    author: WireSignature,
    committer: WireSignature,
}

#[derive(Debug, Serialize)]
struct UpdateRefRequest<'a> {
    sha: &'a str,
    force: bool,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    object: ShaRef,
}

// ─── Commit History ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ListCommitsQuery<'a> {
    sha: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<String>,
    per_page: usize,
    page: u32,
}

async fn list_commits(
    client: &OctocrabClient,
    branch: &str,
    since: Option<DateTime<Utc>>,
    max_count: usize,
) -> Result<GitHubResponse, GitHubApiError> {
    let url = client.repo_path("commits");
    let since = since.map(|s| s.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    let mut commits: Vec<Commit> = Vec::new();
    let mut page = 1u32;
    // Page boundaries depend on the page size, so it stays fixed across pages.
    let per_page = PAGE_SIZE.min(max_count);

    while commits.len() < max_count {
        let query = ListCommitsQuery {
            sha: branch,
            since: since.clone(),
            per_page,
            page,
        };

        let items: Vec<ListedCommit> = client
            .inner()
            .get(&url, Some(&query))
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        let is_last_page = items.len() < per_page;
        commits.extend(items.into_iter().map(Commit::from));
        if is_last_page {
            break;
        }
        page += 1;
    }

    commits.truncate(max_count);
    debug!(branch, count = commits.len(), pages = page, "Listed commits");
    Ok(GitHubResponse::Commits(commits))
}

// ─── Git Data ─────────────────────────────────────────────────────────────────

async fn create_commit(
    client: &OctocrabClient,
    request: &CreateCommitRequest<'_>,
) -> Result<GitHubResponse, GitHubApiError> {
    let url = client.repo_path("git/commits");
    let created: CreatedCommit = client
        .inner()
        .post(&url, Some(request))
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    debug!(sha = %created.sha, "Created commit");
    Ok(GitHubResponse::Commit(created.into()))
}

async fn update_ref(
    client: &OctocrabClient,
    branch: &str,
    sha: Sha,
) -> Result<GitHubResponse, GitHubApiError> {
    let url = client.repo_path(&format!("git/refs/heads/{}", branch));
    let request = UpdateRefRequest {
        sha: sha.as_str(),
        force: false,
    };

    let result: Result<RefObject, _> = client.inner().patch(&url, Some(&request)).await;
    match result {
        Ok(updated) => {
            debug!(branch, sha = %updated.object.sha, "Updated ref");
            Ok(GitHubResponse::RefUpdated {
                sha: Sha::new(updated.object.sha),
            })
        }
        Err(e) => {
            let classified = GitHubApiError::from_octocrab(e);
            if is_ref_conflict(classified.status_code, &classified.message) {
                Err(classified.into_conflict(branch))
            } else {
                Err(classified)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTED: &str = r#"{
        "sha": "6dcb09b5b57875f334f61aebed695e2e4193db5e",
        "html_url": "https://github.com/octocat/Hello-World/commit/6dcb09b5b57875f334f61aebed695e2e4193db5e",
        "commit": {
            "author": {"name": "Monalisa Octocat", "email": "support@github.com", "date": "2011-04-14T16:00:49Z"},
            "committer": {"name": "Monalisa Octocat", "email": "support@github.com", "date": "2011-04-14T16:00:49Z"},
            "message": "Fix all the bugs (#42)",
            "tree": {"sha": "6dcb09b5b57875f334f61aebed695e2e4193db5e", "url": "https://api.github.com/x"},
            "comment_count": 0
        },
        "author": null,
        "parents": [{"sha": "553c2077f0edc3d5dc5d17262f6aa498e69d6f8e", "url": "https://api.github.com/y"}]
    }"#;

    const CREATED: &str = r#"{
        "sha": "7638417db6d59f3c431d3e1f261cc637155684cd",
        "node_id": "MDY6Q29tbWl0NzYzODQxN2RiNmQ1OWYzYzQzMWQzZTFmMjYxY2M2MzcxNTU2ODRjZA==",
        "html_url": "https://github.com/octocat/Hello-World/commit/7638417db6d59f3c431d3e1f261cc637155684cd",
        "author": {"date": "2014-11-07T22:01:45Z", "name": "Monalisa Octocat", "email": "octocat@github.com"},
        "committer": {"date": "2014-11-07T22:01:45Z", "name": "Monalisa Octocat", "email": "octocat@github.com"},
        "message": "my commit message",
        "tree": {"url": "https://api.github.com/t", "sha": "827efc6d56897b048c772eb4087f854f46256132"},
        "parents": [{"url": "https://api.github.com/p", "sha": "7d1b31e74ee336d15cbd21741bc88a537ed063a0"}],
        "verification": {"verified": false, "reason": "unsigned"}
    }"#;

    #[test]
    fn listed_commit_maps_git_fields() {
        let listed: ListedCommit = serde_json::from_str(LISTED).unwrap();
        let commit = Commit::from(listed);

        assert_eq!(commit.sha.as_str(), "6dcb09b5b57875f334f61aebed695e2e4193db5e");
        assert_eq!(commit.author.name, "Monalisa Octocat");
        assert_eq!(commit.author.date.to_rfc3339(), "2011-04-14T16:00:49+00:00");
        assert_eq!(commit.message, "Fix all the bugs (#42)");
        assert_eq!(
            commit.parents,
            vec![Sha::new("553c2077f0edc3d5dc5d17262f6aa498e69d6f8e")]
        );
        assert!(commit.html_url.is_some());
        assert!(!commit.missing);
    }

    #[test]
    fn created_commit_maps_fields() {
        let created: CreatedCommit = serde_json::from_str(CREATED).unwrap();
        let commit = Commit::from(created);

        assert_eq!(commit.sha.as_str(), "7638417db6d59f3c431d3e1f261cc637155684cd");
        assert_eq!(commit.tree.as_str(), "827efc6d56897b048c772eb4087f854f46256132");
        assert_eq!(commit.committer.email, "octocat@github.com");
        assert_eq!(commit.parents.len(), 1);
    }

    #[test]
    fn create_request_carries_authorship() {
        let date = "2024-01-15T12:00:00Z".parse().unwrap();
        let author = Signature::new("Ada", "ada@example.com", date);
        let request = CreateCommitRequest {
            message: "Pick me",
            tree: "abc",
            parents: vec!["def"],
            author: WireSignature::from(&author),
            committer: WireSignature::from(&author),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["parents"], serde_json::json!(["def"]));
        assert_eq!(json["author"]["name"], "Ada");
        assert_eq!(json["author"]["date"], "2024-01-15T12:00:00Z");
    }

    #[test]
    fn ref_update_is_never_forced() {
        let json = serde_json::to_value(UpdateRefRequest {
            sha: "abc",
            force: false,
        })
        .unwrap();
        assert_eq!(json["force"], false);
    }

    #[test]
    fn list_query_omits_missing_since() {
        let query = ListCommitsQuery {
            sha: "main",
            since: None,
            per_page: 100,
            page: 1,
        };
        let json = serde_json::to_value(&query).unwrap();
        assert!(json.get("since").is_none());
        assert_eq!(json["sha"], "main");
    }
}
