//! The branch sync workflow.
//!
//! ```text
//! loading ──done──▶ idle ──confirmPick──▶ askconfirm ──confirmed──▶ picking
//!    │               ▲ ▲                      │                      │   │
//!    │               │ └──cancel / declined───┘                      │   │
//!    │               └───────────────────done────────────────────────┘   │
//!    └──error──▶ loaderror                     pickerror ◀────error──────┘
//! ```
//!
//! `idle`, `askconfirm`, `picking` and `pickerror` are children of the compound
//! `sync` state.
//!
//! `loading` lists both branches and reconciles them. `askconfirm` runs the
//! confirmation machine as a child and forwards `confirm`/`cancel` to it.
//! `picking` recreates the chosen commit on top of the target head and moves
//! the target branch to it.

mod confirm;
mod services;
mod session;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::effects::GitHubInterpreter;
use crate::github::GitHubApiError;
use crate::reconcile::Reconciliation;
use crate::statechart::{
    DefinitionError, Event, Invoke, Machine, MachineDef, MachineEvent, ServiceFuture, StateNode,
    Transition, invoke_machine,
};
use crate::types::{Commit, PickRequest, Sha};

pub use confirm::{
    ConfirmContext, ConfirmEvent, ConfirmMachine, ConfirmState, Decision, confirm_machine,
};
pub use services::{cherry_pick, load_commits};
pub use session::SyncSession;

// ─── Machine Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Loading,
    LoadError,
    Sync,
    Idle,
    AskConfirm,
    Picking,
    PickError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Ask to cherry-pick a missing commit. Ignored unless the commit is missing.
    ConfirmPick(PickRequest),
    Confirm,
    Cancel,
}

impl MachineEvent for SyncEvent {
    fn name(&self) -> &'static str {
        match self {
            SyncEvent::ConfirmPick(_) => "confirmPick",
            SyncEvent::Confirm => "confirm",
            SyncEvent::Cancel => "cancel",
        }
    }
}

/// Completion payloads of the workflow's invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncData {
    Loaded(Reconciliation),
    Confirmation(Decision),
    Picked { sha: Sha, commit: Commit },
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("failed to list commits on {branch}: {source}")]
    Fetch {
        branch: String,
        #[source]
        source: GitHubApiError,
    },

    #[error("failed to pick {sha}: {source}")]
    Write {
        sha: Sha,
        #[source]
        source: GitHubApiError,
    },

    #[error("target branch {0} has no commits to pick onto")]
    NoTargetHead(String),

    #[error("GitHub returned an unexpected response to {0}")]
    UnexpectedResponse(&'static str),

    #[error("pick started without a confirmed request")]
    MissingRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncContext {
    pub commits: Reconciliation,
    /// The sha `heads/<target>` points at, as far as this workflow knows.
    pub head: Option<Sha>,
    /// The pick awaiting confirmation or in flight.
    pub pending: Option<PickRequest>,
    /// The failure shown in `loaderror` / `pickerror`.
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncMachine;

impl Machine for SyncMachine {
    type State = SyncState;
    type Context = SyncContext;
    type Event = SyncEvent;
    type Data = SyncData;
    type Error = SyncError;
}

/// Which branches to compare, and how much history to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub source: String,
    pub target: String,
    pub lookback_days: u32,
    pub max_commits: usize,
}

// ─── Definition ───────────────────────────────────────────────────────────────

fn requested_missing(ctx: &SyncContext, event: &Event<SyncMachine>) -> bool {
    match event.external() {
        Some(SyncEvent::ConfirmPick(request)) => ctx.commits.find_missing(&request.sha).is_some(),
        _ => false,
    }
}

fn confirmed(_: &SyncContext, event: &Event<SyncMachine>) -> bool {
    matches!(
        event.data(),
        Some(SyncData::Confirmation(Decision::Confirmed { .. }))
    )
}

fn store_pending(ctx: &SyncContext, event: &Event<SyncMachine>) -> SyncContext {
    match event.external() {
        Some(SyncEvent::ConfirmPick(request)) => SyncContext {
            pending: Some(request.clone()),
            ..ctx.clone()
        },
        _ => ctx.clone(),
    }
}

fn clear_pending(ctx: &SyncContext, _: &Event<SyncMachine>) -> SyncContext {
    SyncContext {
        pending: None,
        ..ctx.clone()
    }
}

fn record_error(ctx: &SyncContext, event: &Event<SyncMachine>) -> SyncContext {
    SyncContext {
        error: event.error().map(ToString::to_string),
        ..ctx.clone()
    }
}

fn store_loaded(ctx: &SyncContext, event: &Event<SyncMachine>) -> SyncContext {
    match event.data() {
        Some(SyncData::Loaded(commits)) => SyncContext {
            commits: commits.clone(),
            head: commits.target_head().map(|c| c.sha.clone()),
            pending: None,
            error: None,
        },
        _ => ctx.clone(),
    }
}

fn store_picked(ctx: &SyncContext, event: &Event<SyncMachine>) -> SyncContext {
    match event.data() {
        Some(SyncData::Picked { sha, commit }) => SyncContext {
            commits: ctx.commits.replace_commit(sha, commit.clone()),
            head: Some(commit.sha.clone()),
            pending: None,
            error: None,
        },
        _ => ctx.clone(),
    }
}

/// Builds the sync workflow against `github`.
pub fn sync_machine<G>(
    github: Arc<G>,
    options: SyncOptions,
) -> Result<MachineDef<SyncMachine>, DefinitionError>
where
    G: GitHubInterpreter<Error = GitHubApiError> + Send + Sync + 'static,
{
    let options = Arc::new(options);
    let confirm = Arc::new(confirm_machine()?);

    let load = {
        let github = github.clone();
        let options = options.clone();
        move |_: &SyncContext, _: &Event<SyncMachine>| {
            let github = github.clone();
            let options = options.clone();
            let future: ServiceFuture<SyncMachine> = Box::pin(async move {
                load_commits(github.as_ref(), &options)
                    .await
                    .map(SyncData::Loaded)
            });
            future
        }
    };

    let pick = {
        let github = github.clone();
        let options = options.clone();
        move |ctx: &SyncContext, event: &Event<SyncMachine>| {
            let github = github.clone();
            let options = options.clone();
            let head = ctx.head.clone();
            let request = match event.data() {
                Some(SyncData::Confirmation(Decision::Confirmed { request })) => {
                    Some(request.clone())
                }
                _ => None,
            };
            let future: ServiceFuture<SyncMachine> = Box::pin(async move {
                let request = request.ok_or(SyncError::MissingRequest)?;
                let commit =
                    cherry_pick(github.as_ref(), &options.target, head.as_ref(), &request).await?;
                Ok(SyncData::Picked {
                    sha: request.sha,
                    commit,
                })
            });
            future
        }
    };

    let ask = invoke_machine::<SyncMachine, ConfirmMachine, _, _, _>(
        confirm,
        |_: &SyncContext, event: &Event<SyncMachine>| ConfirmContext {
            request: match event.external() {
                Some(SyncEvent::ConfirmPick(request)) => Some(request.clone()),
                _ => None,
            },
        },
        |event: &SyncEvent| match event {
            SyncEvent::Confirm => Some(ConfirmEvent::Confirm),
            SyncEvent::Cancel => Some(ConfirmEvent::Cancel),
            SyncEvent::ConfirmPick(_) => None,
        },
        |decision: Option<Decision>| {
            SyncData::Confirmation(decision.unwrap_or(Decision::Canceled))
        },
    );

    MachineDef::builder("sync", SyncState::Loading)
        .state(
            StateNode::atomic(SyncState::Loading)
                .meta("Loading commits")
                .invoke(Invoke::service("loadCommits", load))
                .on_done(Transition::to(SyncState::Sync).action(store_loaded))
                .on_error(Transition::to(SyncState::LoadError).action(record_error)),
        )
        .state(StateNode::atomic(SyncState::LoadError).meta("Could not load commits"))
        .state(StateNode::compound(SyncState::Sync, SyncState::Idle))
        .state(
            StateNode::atomic(SyncState::Idle)
                .within(SyncState::Sync)
                .on(
                    "confirmPick",
                    Transition::to(SyncState::AskConfirm)
                        .guard(requested_missing)
                        .action(store_pending),
                ),
        )
        .state(
            StateNode::atomic(SyncState::AskConfirm)
                .within(SyncState::Sync)
                .meta("Waiting for confirmation")
                .invoke(Invoke::new("confirm", ask).forward_events())
                .on_done(Transition::to(SyncState::Picking).guard(confirmed))
                .on_done(Transition::to(SyncState::Idle).action(clear_pending))
                .on("cancel", Transition::to(SyncState::Idle).action(clear_pending)),
        )
        .state(
            StateNode::atomic(SyncState::Picking)
                .within(SyncState::Sync)
                .meta("Cherry-picking")
                .invoke(Invoke::service("pick", pick))
                .on_done(Transition::to(SyncState::Idle).action(store_picked))
                .on_error(Transition::to(SyncState::PickError).action(record_error)),
        )
        .state(
            StateNode::atomic(SyncState::PickError)
                .within(SyncState::Sync)
                .meta("Cherry-pick failed"),
        )
        .build()
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
