//! The pure dispatch core.
//!
//! An `Instance` holds the active configuration and context of one running
//! machine. Feeding it an event computes the complete microstep (exits, actions,
//! entries) and returns the asynchronous work to start or cancel as `Effect`
//! values. It never spawns anything itself, so every ordering rule can be tested
//! without a runtime.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

use super::model::{
    Action, Event, Generation, InvokeId, InvokeSrc, Machine, MachineDef, MachineEvent, StateKind,
    Transition,
};

/// Lifecycle of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status<D> {
    Active,
    /// Reached a final state directly under the root, with that state's output.
    Done(Option<D>),
    Stopped,
}

/// A read-only copy of an instance's state.
#[derive(Debug, Clone)]
pub struct Snapshot<M: Machine> {
    /// Active states, outermost first. Empty before start.
    pub path: Vec<M::State>,
    pub context: M::Context,
    pub status: Status<M::Data>,
}

impl<M: Machine> Snapshot<M> {
    /// True if `state` is active, at any depth.
    pub fn matches(&self, state: M::State) -> bool {
        self.path.contains(&state)
    }

    /// The innermost active state.
    pub fn leaf(&self) -> Option<M::State> {
        self.path.last().copied()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, Status::Active)
    }
}

/// Asynchronous work requested by a step. Executed by the runtime.
pub enum Effect<M: Machine> {
    Start(StartInvocation<M>),
    Cancel { id: InvokeId, generation: Generation },
    Forward {
        id: InvokeId,
        generation: Generation,
        event: M::Event,
    },
}

impl<M: Machine> std::fmt::Debug for Effect<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::Start(start) => f
                .debug_struct("Start")
                .field("id", &start.id)
                .field("generation", &start.generation)
                .finish(),
            Effect::Cancel { id, generation } => f
                .debug_struct("Cancel")
                .field("id", id)
                .field("generation", generation)
                .finish(),
            Effect::Forward {
                id,
                generation,
                event,
            } => f
                .debug_struct("Forward")
                .field("id", id)
                .field("generation", generation)
                .field("event", event)
                .finish(),
        }
    }
}

/// Everything needed to start one invocation.
pub struct StartInvocation<M: Machine> {
    pub id: InvokeId,
    pub generation: Generation,
    pub src: InvokeSrc<M>,
    /// The context after the step that entered the invoking state.
    pub context: M::Context,
    /// The event that entered the invoking state.
    pub event: Event<M>,
}

/// How an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A transition was taken.
    Transitioned,
    /// No active state had an enabled transition for the event.
    Unhandled,
    /// A completion for an invocation that is no longer running.
    Stale,
    /// The instance is not active.
    Halted,
}

/// The result of sending one event.
#[derive(Debug)]
pub struct Step<M: Machine> {
    pub outcome: Outcome,
    pub effects: Vec<Effect<M>>,
}

impl<M: Machine> Step<M> {
    fn only(outcome: Outcome) -> Self {
        Step {
            outcome,
            effects: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Entering a state whose invoke id is still registered. Built definitions
    /// have unique invoke ids, so this only guards against engine bugs.
    #[error("invocation {id} is already in flight (entering {state})")]
    InvocationInFlight { id: InvokeId, state: String },
}

#[derive(Debug, Clone, Copy)]
struct ActiveInvocation<S> {
    state: S,
    generation: Generation,
    forward: bool,
}

/// One running machine, without any async machinery.
pub struct Instance<M: Machine> {
    def: Arc<MachineDef<M>>,
    path: Vec<M::State>,
    context: M::Context,
    status: Status<M::Data>,
    invocations: HashMap<InvokeId, ActiveInvocation<M::State>>,
    next_generation: u64,
}

impl<M: Machine> Instance<M> {
    pub fn new(def: Arc<MachineDef<M>>, context: M::Context) -> Self {
        Instance {
            def,
            path: Vec::new(),
            context,
            status: Status::Active,
            invocations: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn def(&self) -> &Arc<MachineDef<M>> {
        &self.def
    }

    pub fn path(&self) -> &[M::State] {
        &self.path
    }

    pub fn context(&self) -> &M::Context {
        &self.context
    }

    pub fn status(&self) -> &Status<M::Data> {
        &self.status
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, Status::Active)
    }

    pub fn snapshot(&self) -> Snapshot<M> {
        Snapshot {
            path: self.path.clone(),
            context: self.context.clone(),
            status: self.status.clone(),
        }
    }

    /// Enters the initial configuration. Does nothing if already started.
    pub fn start(&mut self) -> Vec<Effect<M>> {
        if !self.path.is_empty() || !self.is_active() {
            return Vec::new();
        }
        let entry = self.def.initial_path();
        debug!(machine = self.def.id(), path = ?entry, "Starting instance");
        // A fresh instance has no invocations in flight, so this cannot conflict.
        self.apply(0, entry, &[], &Event::Init).unwrap_or_default()
    }

    /// Processes one event to completion.
    pub fn send(&mut self, event: Event<M>) -> Result<Step<M>, EngineError> {
        if !self.is_active() || self.path.is_empty() {
            trace!(machine = self.def.id(), event = event.name(), "Instance halted");
            return Ok(Step::only(Outcome::Halted));
        }

        match &event {
            Event::Init => Ok(Step::only(Outcome::Unhandled)),
            Event::External(external) => {
                let mut effects = self.forwards(external);
                let selected = self.select(external.name(), &event);
                match selected {
                    None => {
                        debug!(
                            machine = self.def.id(),
                            event = external.name(),
                            state = ?self.path.last(),
                            "Event not handled"
                        );
                        Ok(Step {
                            outcome: Outcome::Unhandled,
                            effects,
                        })
                    }
                    Some((source, transition)) => {
                        effects.extend(self.transition(source, &transition, &event)?);
                        Ok(Step {
                            outcome: Outcome::Transitioned,
                            effects,
                        })
                    }
                }
            }
            Event::Done { id, generation, .. } | Event::Error { id, generation, .. } => {
                self.complete(*id, *generation, &event)
            }
        }
    }

    /// Stops the instance and cancels everything it was running.
    pub fn stop(&mut self) -> Vec<Effect<M>> {
        if !self.is_active() {
            return Vec::new();
        }
        self.status = Status::Stopped;
        debug!(machine = self.def.id(), "Stopping instance");
        let effects = self.cancel_all();
        self.invocations.clear();
        effects
    }

    fn forwards(&self, event: &M::Event) -> Vec<Effect<M>> {
        self.path
            .iter()
            .filter_map(|state| {
                let invoke = self.def.node(*state).invoke.as_ref()?;
                let active = self.invocations.get(&invoke.id)?;
                active.forward.then(|| Effect::Forward {
                    id: invoke.id,
                    generation: active.generation,
                    event: event.clone(),
                })
            })
            .collect()
    }

    /// Finds the innermost active state with an enabled transition for `name`.
    fn select(&self, name: &str, event: &Event<M>) -> Option<(M::State, Transition<M>)> {
        self.path.iter().rev().find_map(|state| {
            self.def
                .node(*state)
                .on
                .get(name)?
                .iter()
                .find(|t| t.enabled(&self.context, event))
                .map(|t| (*state, t.clone()))
        })
    }

    fn complete(
        &mut self,
        id: InvokeId,
        generation: Generation,
        event: &Event<M>,
    ) -> Result<Step<M>, EngineError> {
        let active = match self.invocations.get(&id) {
            Some(active) if active.generation == generation => *active,
            _ => {
                debug!(
                    machine = self.def.id(),
                    invoke = %id,
                    generation = %generation,
                    "Discarding stale completion"
                );
                return Ok(Step::only(Outcome::Stale));
            }
        };

        let node = self.def.node(active.state);
        let candidates = match event {
            Event::Error { .. } => &node.on_error,
            _ => &node.on_done,
        };
        let transition = candidates
            .iter()
            .find(|t| t.enabled(&self.context, event))
            .cloned();

        // The invocation has finished either way; exiting its state must not cancel it.
        self.invocations.remove(&id);

        let Some(transition) = transition else {
            if let Event::Error { error, .. } = event {
                warn!(
                    machine = self.def.id(),
                    invoke = %id,
                    ?error,
                    "Invocation failed with no matching error transition"
                );
            }
            return Ok(Step::only(Outcome::Unhandled));
        };

        match self.transition(active.state, &transition, event) {
            Ok(effects) => Ok(Step {
                outcome: Outcome::Transitioned,
                effects,
            }),
            Err(e) => {
                self.invocations.insert(id, active);
                Err(e)
            }
        }
    }

    fn transition(
        &mut self,
        source: M::State,
        transition: &Transition<M>,
        event: &Event<M>,
    ) -> Result<Vec<Effect<M>>, EngineError> {
        let target = transition.target;
        let domain = self.def.transition_domain(source, target);

        // The domain is an ancestor of an active state, so it is on the path.
        let keep = match domain {
            None => 0,
            Some(domain) => self
                .path
                .iter()
                .position(|s| *s == domain)
                .map_or(0, |i| i + 1),
        };

        let mut entry: Vec<M::State> = self
            .def
            .ancestors(target)
            .into_iter()
            .skip_while(|s| Some(*s) != domain)
            .skip(usize::from(domain.is_some()))
            .collect();
        entry.push(target);
        entry.extend(self.def.initial_descent(target));

        debug!(
            machine = self.def.id(),
            event = event.name(),
            from = ?self.path.last(),
            to = ?entry.last(),
            "Transition"
        );

        self.apply(keep, entry, &transition.actions, event)
    }

    /// Computes a whole microstep and commits it only if it succeeds.
    ///
    /// States at `path[keep..]` are exited innermost first, then `actions` run,
    /// then `entry` is entered outermost first.
    fn apply(
        &mut self,
        keep: usize,
        entry: Vec<M::State>,
        actions: &[Action<M>],
        event: &Event<M>,
    ) -> Result<Vec<Effect<M>>, EngineError> {
        let exit: Vec<M::State> = self.path[keep..].iter().rev().copied().collect();

        let mut context = self.context.clone();
        for state in &exit {
            for action in &self.def.node(*state).exit {
                context = action(&context, event);
            }
        }
        for action in actions {
            context = action(&context, event);
        }
        for state in &entry {
            for action in &self.def.node(*state).entry {
                context = action(&context, event);
            }
        }

        let mut invocations = self.invocations.clone();
        let mut effects = Vec::new();
        for state in &exit {
            if let Some(invoke) = &self.def.node(*state).invoke
                && let Some(active) = invocations.remove(&invoke.id)
            {
                effects.push(Effect::Cancel {
                    id: invoke.id,
                    generation: active.generation,
                });
            }
        }

        let mut next_generation = self.next_generation;
        for state in &entry {
            let Some(invoke) = &self.def.node(*state).invoke else {
                continue;
            };
            // Exit cancels the invocations of every exited state, a state is only
            // entered after it was exited, and the builder rejects duplicate
            // invoke ids. A live entry here is an engine bug.
            debug_assert!(
                !invocations.contains_key(&invoke.id),
                "invocation {} still running on entry to {:?}",
                invoke.id,
                state
            );
            if invocations.contains_key(&invoke.id) {
                return Err(EngineError::InvocationInFlight {
                    id: invoke.id,
                    state: format!("{:?}", state),
                });
            }
            let generation = Generation(next_generation);
            next_generation += 1;
            invocations.insert(
                invoke.id,
                ActiveInvocation {
                    state: *state,
                    generation,
                    forward: invoke.forward,
                },
            );
            effects.push(Effect::Start(StartInvocation {
                id: invoke.id,
                generation,
                src: invoke.src.clone(),
                context: context.clone(),
                event: event.clone(),
            }));
        }

        let mut path = self.path[..keep].to_vec();
        path.extend(entry);

        self.path = path;
        self.context = context;
        self.invocations = invocations;
        self.next_generation = next_generation;

        if let [root] = self.path.as_slice()
            && let StateKind::Final { data } = &self.def.node(*root).kind
        {
            let output = data.as_ref().map(|f| f(&self.context, event));
            debug!(machine = self.def.id(), state = ?root, "Instance done");
            self.status = Status::Done(output);
            effects.extend(self.cancel_all());
            self.invocations.clear();
        }

        Ok(effects)
    }

    fn cancel_all(&self) -> Vec<Effect<M>> {
        let mut active: Vec<_> = self.invocations.iter().collect();
        active.sort_by_key(|(_, a)| a.generation);
        active
            .into_iter()
            .rev()
            .map(|(id, a)| Effect::Cancel {
                id: *id,
                generation: a.generation,
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
