//! Ownership of the running sync workflow.

use std::sync::Arc;

use tokio_util::sync::DropGuard;
use tracing::info;

use crate::effects::GitHubInterpreter;
use crate::github::GitHubApiError;
use crate::statechart::{ActorRef, DefinitionError, MachineDef, Snapshot, spawn};

use super::{SyncContext, SyncMachine, SyncOptions, sync_machine};

/// A running sync workflow.
///
/// The actor (and every service and child machine it invoked) is stopped when
/// the session is dropped. Handles obtained from `actor()` stay valid but see
/// a terminated actor afterwards.
pub struct SyncSession {
    actor: ActorRef<SyncMachine>,
    _guard: DropGuard,
}

impl SyncSession {
    /// Builds the workflow against `github` and starts it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<G>(github: Arc<G>, options: SyncOptions) -> Result<Self, DefinitionError>
    where
        G: GitHubInterpreter<Error = GitHubApiError> + Send + Sync + 'static,
    {
        let def = sync_machine(github, options)?;
        Ok(Self::start(Arc::new(def)))
    }

    /// Starts an already built definition with an empty context.
    pub fn start(def: Arc<MachineDef<SyncMachine>>) -> Self {
        let actor = spawn(def, SyncContext::default());
        let guard = actor.drop_guard();
        info!("Started sync workflow");
        Self {
            actor,
            _guard: guard,
        }
    }

    pub fn actor(&self) -> &ActorRef<SyncMachine> {
        &self.actor
    }

    pub fn snapshot(&self) -> Snapshot<SyncMachine> {
        self.actor.snapshot()
    }

    /// Stops the workflow now rather than on drop.
    pub fn stop(&self) {
        self.actor.stop();
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}
