//! Binding between the running workflow and whatever renders it.
//!
//! Snapshots go out as `SyncView`s, computed by an exhaustive match on the
//! active state so a new state cannot be added without deciding how it looks.
//! Operator input comes back as `UserAction`s and is turned into workflow
//! events here, against the current snapshot.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::statechart::{ActorRef, Snapshot, Status};
use crate::types::{Commit, PickRequest, RepoId, Sha};
use crate::workflow::{SyncEvent, SyncMachine, SyncState};

// ─── Views ────────────────────────────────────────────────────────────────────

/// A `#123` reference found in a commit message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLink {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitView {
    pub sha: Sha,
    pub short_sha: String,
    /// Author date as dd/mm/yyyy.
    pub date: String,
    pub author: String,
    pub summary: String,
    pub issues: Vec<IssueLink>,
    /// Only missing commits can be picked.
    pub missing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchView {
    pub name: String,
    pub commits: Vec<CommitView>,
}

/// What is drawn on top of the two branch lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    None,
    Confirming { commit: Option<CommitView> },
    Picking { commit: Option<CommitView> },
    PickFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum SyncView {
    Loading,
    LoadFailed {
        error: String,
    },
    Sync {
        source: BranchView,
        target: BranchView,
        overlay: Overlay,
    },
}

impl SyncView {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncView::Loading => "loading",
            SyncView::LoadFailed { .. } => "load_failed",
            SyncView::Sync { overlay, .. } => match overlay {
                Overlay::None => "sync",
                Overlay::Confirming { .. } => "confirming",
                Overlay::Picking { .. } => "picking",
                Overlay::PickFailed { .. } => "pick_failed",
            },
        }
    }
}

/// Input from the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UserAction {
    Pick { sha: Sha },
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("commit {0} is not missing from the target branch")]
    NotMissing(Sha),
}

/// Extracts the unique `#<digits>` references of `message`, in order of appearance.
pub fn issue_numbers(message: &str) -> Vec<u64> {
    let mut numbers = Vec::new();
    for (idx, _) in message.match_indices('#') {
        let digits: String = message[idx + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(number) = digits.parse::<u64>()
            && !numbers.contains(&number)
        {
            numbers.push(number);
        }
    }
    numbers
}

// ─── Binding ──────────────────────────────────────────────────────────────────

/// Knows which repository and branches the workflow is about.
#[derive(Debug, Clone)]
pub struct Binding {
    repo: RepoId,
    source: String,
    target: String,
}

impl Binding {
    pub fn new(repo: RepoId, source: impl Into<String>, target: impl Into<String>) -> Self {
        Binding {
            repo,
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn commit_view(&self, commit: &Commit) -> CommitView {
        CommitView {
            sha: commit.sha.clone(),
            short_sha: commit.sha.short().to_string(),
            date: commit.author.date.format("%d/%m/%Y").to_string(),
            author: commit.author.name.clone(),
            summary: commit.summary().to_string(),
            issues: issue_numbers(&commit.message)
                .into_iter()
                .map(|number| IssueLink {
                    number,
                    url: self.repo.issue_url(number),
                })
                .collect(),
            missing: commit.missing,
            html_url: commit.html_url.clone(),
        }
    }

    fn branch_view(&self, name: &str, commits: &[Commit]) -> BranchView {
        BranchView {
            name: name.to_string(),
            commits: commits.iter().map(|c| self.commit_view(c)).collect(),
        }
    }

    /// Maps a snapshot to what should be on screen.
    pub fn view(&self, snapshot: &Snapshot<SyncMachine>) -> SyncView {
        let ctx = &snapshot.context;
        let error = || ctx.error.clone().unwrap_or_default();
        let pending = || ctx.pending.as_ref().map(|p| self.commit_view(&p.commit));

        let overlay = match snapshot.leaf() {
            None | Some(SyncState::Loading) => return SyncView::Loading,
            Some(SyncState::LoadError) => return SyncView::LoadFailed { error: error() },
            Some(SyncState::Sync | SyncState::Idle) => Overlay::None,
            Some(SyncState::AskConfirm) => Overlay::Confirming { commit: pending() },
            Some(SyncState::Picking) => Overlay::Picking { commit: pending() },
            Some(SyncState::PickError) => Overlay::PickFailed { error: error() },
        };

        SyncView::Sync {
            source: self.branch_view(&self.source, &ctx.commits.source),
            target: self.branch_view(&self.target, &ctx.commits.target),
            overlay,
        }
    }

    /// Turns an operator action into a workflow event.
    ///
    /// A pick is resolved against the current snapshot; the request carries
    /// the placeholder commit so the workflow can recreate it.
    pub fn event(
        &self,
        snapshot: &Snapshot<SyncMachine>,
        action: UserAction,
    ) -> Result<SyncEvent, ActionError> {
        match action {
            UserAction::Pick { sha } => snapshot
                .context
                .commits
                .find_missing(&sha)
                .cloned()
                .map(|commit| SyncEvent::ConfirmPick(PickRequest::new(commit)))
                .ok_or(ActionError::NotMissing(sha)),
            UserAction::Confirm => Ok(SyncEvent::Confirm),
            UserAction::Cancel => Ok(SyncEvent::Cancel),
        }
    }
}

// ─── Observers ────────────────────────────────────────────────────────────────

/// Receives a view after every processed event.
pub trait Renderer: Send + 'static {
    fn render(&mut self, view: &SyncView);
}

/// Renders by logging. Used by the binary, which serves views over HTTP.
#[derive(Debug, Default)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn render(&mut self, view: &SyncView) {
        match view {
            SyncView::LoadFailed { error } => info!(view = view.name(), %error, "View changed"),
            SyncView::Sync {
                overlay: Overlay::PickFailed { error },
                ..
            } => info!(view = view.name(), %error, "View changed"),
            SyncView::Sync { target, .. } => info!(
                view = view.name(),
                missing = target.commits.iter().filter(|c| c.missing).count(),
                "View changed"
            ),
            SyncView::Loading => info!(view = view.name(), "View changed"),
        }
    }
}

/// Pumps views of `actor` into `renderer` until the actor terminates.
///
/// Renders the current view immediately. Intermediate snapshots may be
/// skipped when the renderer is slower than the workflow; the latest one is
/// always rendered.
pub fn bind<R: Renderer>(
    actor: &ActorRef<SyncMachine>,
    binding: Binding,
    mut renderer: R,
) -> JoinHandle<()> {
    let mut snapshots = actor.subscribe();
    tokio::spawn(async move {
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            renderer.render(&binding.view(&snapshot));
            if !matches!(snapshot.status, Status::Active) {
                break;
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
        debug!("Binding finished");
    })
}
