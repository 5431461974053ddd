//! GitHub API error types.
//!
//! Failures are classified so callers can decide what to do with them:
//!
//! - **Transient** errors may succeed on retry (5xx, rate limits, network trouble)
//! - **Permanent** errors will not (most 4xx, bad credentials, missing objects)
//! - **Conflict** errors mean the remote moved underneath us, e.g. a ref update
//!   that is no longer a fast-forward. Retrying the same request cannot help.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// The kind of GitHub API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// Requires a human (or a different request) to resolve.
    Permanent,

    /// The target ref changed since it was read.
    Conflict,
}

impl GitHubErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A GitHub API error with categorization for retry decisions.
///
/// Cheap to clone: the underlying octocrab error is shared. Workflow contexts
/// store these by value.
#[derive(Debug, Clone, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if known.
    pub status_code: Option<u16>,

    pub message: String,

    #[source]
    pub source: Option<Arc<octocrab::Error>>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    fn new(
        kind: GitHubErrorKind,
        status_code: Option<u16>,
        message: impl Into<String>,
        source: Option<octocrab::Error>,
    ) -> Self {
        Self {
            kind,
            status_code,
            message: message.into(),
            source: source.map(Arc::new),
        }
    }

    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::Permanent, None, message, None)
    }

    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::Transient, None, message, None)
    }

    /// Reclassifies a failed update of `heads/<branch>` as a conflict.
    pub fn into_conflict(self, branch: &str) -> Self {
        Self {
            kind: GitHubErrorKind::Conflict,
            message: format!(
                "heads/{} has moved; update is not a fast-forward ({})",
                branch, self.message
            ),
            ..self
        }
    }

    /// Categorizes an octocrab error by status code and message.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = extract_status_code(&err);
        let message = error_message(&err);
        let kind = classify(status_code, &message);
        Self::new(kind, status_code, message, Some(err))
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == GitHubErrorKind::Conflict
    }
}

/// Classifies a failure from its status code and message.
///
/// Kept separate from `from_octocrab` so it can be tested without constructing
/// octocrab errors.
pub fn classify(status_code: Option<u16>, message: &str) -> GitHubErrorKind {
    if is_transient_message(message) {
        return GitHubErrorKind::Transient;
    }
    match status_code {
        Some(429) => GitHubErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => GitHubErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
        Some(_) => GitHubErrorKind::Permanent,
        None if is_network_error(message) => GitHubErrorKind::Transient,
        None => GitHubErrorKind::Permanent,
    }
}

/// True if a failed ref update was rejected because the branch moved.
///
/// GitHub answers a non-fast-forward `PATCH .../git/refs` with 422 "Update is
/// not a fast forward"; some proxies surface it as 409.
pub fn is_ref_conflict(status_code: Option<u16>, message: &str) -> bool {
    let lower = message.to_lowercase();
    status_code == Some(409) || lower.contains("not a fast forward")
}

fn error_message(err: &octocrab::Error) -> String {
    match err {
        octocrab::Error::GitHub { source, .. } => source.message.clone(),
        other => other.to_string(),
    }
}

/// Extracts the HTTP status code from an octocrab error, if present.
///
/// API errors carry the status directly. For everything else fall back to
/// scanning the rendered message for a `status: NNN` marker.
fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
    if let octocrab::Error::GitHub { source, .. } = err {
        return Some(source.status_code.as_u16());
    }
    status_from_message(&err.to_string())
}

fn status_from_message(message: &str) -> Option<u16> {
    let idx = message.find("status: ")?;
    let digits: String = message[idx + 8..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("try again") || lower.contains("temporarily unavailable")
}

fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("abuse detection")
}

fn is_network_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("dns")
}
