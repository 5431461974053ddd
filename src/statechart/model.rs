//! Declarative statechart definitions.
//!
//! A `MachineDef` is immutable data describing a tree of states: which states
//! exist, how they nest, which transitions each state takes on which events, and
//! what asynchronous work (services or child machines) each state invokes while
//! it is active. Nothing here executes anything; see `instance` for the pure
//! dispatch core and `runtime` for the async shell.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The type family of one machine.
///
/// Implemented by a zero-sized marker type per machine. Grouping the types this
/// way keeps `MachineDef<M>`, `Instance<M>` and `ActorRef<M>` to a single type
/// parameter.
pub trait Machine: Clone + fmt::Debug + Send + Sync + 'static {
    /// Closed set of state ids. Every state in the tree has a distinct id.
    type State: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Data owned by each running instance. Updated only by pure actions.
    type Context: Clone + fmt::Debug + Send + Sync + 'static;

    /// Events sent to the machine from outside.
    type Event: MachineEvent;

    /// Success payload of invocations, and the output of root-level final states.
    type Data: Clone + fmt::Debug + Send + Sync + 'static;

    /// Failure payload of service invocations.
    type Error: Clone + fmt::Debug + Send + Sync + 'static;
}

/// An externally sent event. Transitions are keyed by the event's name.
pub trait MachineEvent: Clone + fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &'static str;
}

/// Identifies an invocation within a machine definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvokeId(pub &'static str);

impl fmt::Display for InvokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distinguishes successive runs of the same invocation.
///
/// Every time a state with an invocation is entered, the invocation gets a fresh
/// generation. Completion events carry the generation they were started with, so
/// a late completion from a run that has since been cancelled can be recognised
/// and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything an instance can receive.
#[derive(Debug, Clone)]
pub enum Event<M: Machine> {
    /// The pseudo-event under which the initial configuration is entered.
    Init,

    /// An event sent from outside the instance.
    External(M::Event),

    /// An invocation completed successfully.
    Done {
        id: InvokeId,
        generation: Generation,
        data: M::Data,
    },

    /// A service invocation failed.
    Error {
        id: InvokeId,
        generation: Generation,
        error: M::Error,
    },
}

impl<M: Machine> Event<M> {
    /// A short name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Init => "init",
            Event::External(event) => event.name(),
            Event::Done { .. } => "done.invoke",
            Event::Error { .. } => "error.invoke",
        }
    }

    /// The external event, if this is one.
    pub fn external(&self) -> Option<&M::Event> {
        match self {
            Event::External(event) => Some(event),
            _ => None,
        }
    }

    /// The success payload, if this is a completion.
    pub fn data(&self) -> Option<&M::Data> {
        match self {
            Event::Done { data, .. } => Some(data),
            _ => None,
        }
    }

    /// The failure payload, if this is a service failure.
    pub fn error(&self) -> Option<&M::Error> {
        match self {
            Event::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Decides whether a transition may be taken.
pub type Guard<M> =
    Arc<dyn Fn(&<M as Machine>::Context, &Event<M>) -> bool + Send + Sync + 'static>;

/// A pure context update: returns the next context without touching the current one.
pub type Action<M> = Arc<
    dyn Fn(&<M as Machine>::Context, &Event<M>) -> <M as Machine>::Context
        + Send
        + Sync
        + 'static,
>;

/// Computes the output of a final state.
pub type DataFn<M> = Arc<
    dyn Fn(&<M as Machine>::Context, &Event<M>) -> <M as Machine>::Data + Send + Sync + 'static,
>;

/// The future returned by a service.
pub type ServiceFuture<M> = Pin<
    Box<dyn Future<Output = Result<<M as Machine>::Data, <M as Machine>::Error>> + Send + 'static>,
>;

/// Starts a service from the context and the event that entered its state.
pub type ServiceFn<M> =
    Arc<dyn Fn(&<M as Machine>::Context, &Event<M>) -> ServiceFuture<M> + Send + Sync + 'static>;

/// Spawns a child actor under the given token. Cancelling the token stops the child.
pub type SpawnFn<M> = Arc<
    dyn Fn(&<M as Machine>::Context, &Event<M>, CancellationToken) -> ChildActor<M>
        + Send
        + Sync
        + 'static,
>;

/// A running child actor, seen from its parent.
pub struct ChildActor<M: Machine> {
    /// Resolves with the parent-side payload once the child reaches a final state.
    pub done: ServiceFuture<M>,

    /// Delivers a parent event to the child's mailbox.
    pub forward: Box<dyn Fn(&M::Event) + Send + Sync>,
}

/// What an invocation runs.
#[derive(Clone)]
pub enum InvokeSrc<M: Machine> {
    /// An asynchronous operation resolving to success or failure.
    Service(ServiceFn<M>),

    /// A nested machine whose completion counts as success.
    Actor(SpawnFn<M>),
}

/// Asynchronous work bound to the lifetime of a state.
#[derive(Clone)]
pub struct Invoke<M: Machine> {
    pub(crate) id: InvokeId,
    pub(crate) src: InvokeSrc<M>,
    pub(crate) forward: bool,
}

impl<M: Machine> Invoke<M> {
    pub fn new(id: &'static str, src: InvokeSrc<M>) -> Self {
        Invoke {
            id: InvokeId(id),
            src,
            forward: false,
        }
    }

    /// An invocation of an async service.
    pub fn service<F>(id: &'static str, service: F) -> Self
    where
        F: Fn(&M::Context, &Event<M>) -> ServiceFuture<M> + Send + Sync + 'static,
    {
        Self::new(id, InvokeSrc::Service(Arc::new(service)))
    }

    /// Forward every external event the parent receives to the invoked child.
    pub fn forward_events(mut self) -> Self {
        self.forward = true;
        self
    }

    pub fn id(&self) -> InvokeId {
        self.id
    }

    fn is_service(&self) -> bool {
        matches!(self.src, InvokeSrc::Service(_))
    }
}

impl<M: Machine> fmt::Debug for Invoke<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.src {
            InvokeSrc::Service(_) => "service",
            InvokeSrc::Actor(_) => "actor",
        };
        f.debug_struct("Invoke")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("forward", &self.forward)
            .finish()
    }
}

/// A guarded edge to a target state, with the context updates applied on the way.
#[derive(Clone)]
pub struct Transition<M: Machine> {
    pub(crate) target: M::State,
    pub(crate) guard: Option<Guard<M>>,
    pub(crate) actions: Vec<Action<M>>,
}

impl<M: Machine> Transition<M> {
    pub fn to(target: M::State) -> Self {
        Transition {
            target,
            guard: None,
            actions: Vec::new(),
        }
    }

    /// Only take this transition when `guard` holds.
    pub fn guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&M::Context, &Event<M>) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Append a context update. Actions run in the order they were added.
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&M::Context, &Event<M>) -> M::Context + Send + Sync + 'static,
    {
        self.actions.push(Arc::new(action));
        self
    }

    pub fn target(&self) -> M::State {
        self.target
    }

    pub(crate) fn enabled(&self, context: &M::Context, event: &Event<M>) -> bool {
        self.guard.as_ref().is_none_or(|guard| guard(context, event))
    }
}

impl<M: Machine> fmt::Debug for Transition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("target", &self.target)
            .field("guarded", &self.guard.is_some())
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// The shape of a state.
#[derive(Clone)]
pub enum StateKind<M: Machine> {
    /// A leaf state.
    Atomic,

    /// A state with children; entering it enters `initial`.
    Compound { initial: M::State },

    /// A state with no way out. Directly under the root, entering it completes
    /// the instance with the output of `data`.
    Final { data: Option<DataFn<M>> },
}

impl<M: Machine> fmt::Debug for StateKind<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Atomic => write!(f, "Atomic"),
            StateKind::Compound { initial } => {
                f.debug_struct("Compound").field("initial", initial).finish()
            }
            StateKind::Final { data } => f
                .debug_struct("Final")
                .field("has_data", &data.is_some())
                .finish(),
        }
    }
}

/// One state of a machine definition.
#[derive(Clone)]
pub struct StateNode<M: Machine> {
    pub(crate) id: M::State,
    pub(crate) parent: Option<M::State>,
    pub(crate) kind: StateKind<M>,
    pub(crate) entry: Vec<Action<M>>,
    pub(crate) exit: Vec<Action<M>>,
    pub(crate) invoke: Option<Invoke<M>>,
    pub(crate) on: HashMap<&'static str, Vec<Transition<M>>>,
    pub(crate) on_done: Vec<Transition<M>>,
    pub(crate) on_error: Vec<Transition<M>>,
    pub(crate) meta: Option<&'static str>,
}

impl<M: Machine> StateNode<M> {
    fn with_kind(id: M::State, kind: StateKind<M>) -> Self {
        StateNode {
            id,
            parent: None,
            kind,
            entry: Vec::new(),
            exit: Vec::new(),
            invoke: None,
            on: HashMap::new(),
            on_done: Vec::new(),
            on_error: Vec::new(),
            meta: None,
        }
    }

    pub fn atomic(id: M::State) -> Self {
        Self::with_kind(id, StateKind::Atomic)
    }

    pub fn compound(id: M::State, initial: M::State) -> Self {
        Self::with_kind(id, StateKind::Compound { initial })
    }

    pub fn final_state(id: M::State) -> Self {
        Self::with_kind(id, StateKind::Final { data: None })
    }

    /// Nest this state inside `parent`, which must be compound.
    pub fn within(mut self, parent: M::State) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the output of a final state. Ignored on other kinds.
    pub fn data<F>(mut self, data: F) -> Self
    where
        F: Fn(&M::Context, &Event<M>) -> M::Data + Send + Sync + 'static,
    {
        if let StateKind::Final { data: slot } = &mut self.kind {
            *slot = Some(Arc::new(data));
        }
        self
    }

    pub fn entry<F>(mut self, action: F) -> Self
    where
        F: Fn(&M::Context, &Event<M>) -> M::Context + Send + Sync + 'static,
    {
        self.entry.push(Arc::new(action));
        self
    }

    pub fn exit<F>(mut self, action: F) -> Self
    where
        F: Fn(&M::Context, &Event<M>) -> M::Context + Send + Sync + 'static,
    {
        self.exit.push(Arc::new(action));
        self
    }

    pub fn invoke(mut self, invoke: Invoke<M>) -> Self {
        self.invoke = Some(invoke);
        self
    }

    /// Register a transition for the named event. For the same name, earlier
    /// registrations are tried first.
    pub fn on(mut self, event: &'static str, transition: Transition<M>) -> Self {
        self.on.entry(event).or_default().push(transition);
        self
    }

    /// Register a transition taken when this state's invocation completes.
    pub fn on_done(mut self, transition: Transition<M>) -> Self {
        self.on_done.push(transition);
        self
    }

    /// Register a transition taken when this state's service fails.
    pub fn on_error(mut self, transition: Transition<M>) -> Self {
        self.on_error.push(transition);
        self
    }

    /// Attach a free-form tag, e.g. for renderers.
    pub fn meta(mut self, meta: &'static str) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn id(&self) -> M::State {
        self.id
    }

    pub fn parent(&self) -> Option<M::State> {
        self.parent
    }

    pub fn kind(&self) -> &StateKind<M> {
        &self.kind
    }

    pub fn meta_tag(&self) -> Option<&'static str> {
        self.meta
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, StateKind::Final { .. })
    }

    fn transitions(&self) -> impl Iterator<Item = (&'static str, &Transition<M>)> {
        self.on
            .iter()
            .flat_map(|(name, ts)| ts.iter().map(move |t| (*name, t)))
            .chain(self.on_done.iter().map(|t| ("done.invoke", t)))
            .chain(self.on_error.iter().map(|t| ("error.invoke", t)))
    }
}

impl<M: Machine> fmt::Debug for StateNode<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("kind", &self.kind)
            .field("invoke", &self.invoke)
            .finish_non_exhaustive()
    }
}

/// Reasons a machine definition is rejected by `MachineBuilder::build`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("state {0} is declared more than once")]
    DuplicateState(String),

    #[error("state {state} names unknown parent {parent}")]
    UnknownParent { state: String, parent: String },

    #[error("state {state} is nested in {parent}, which is not a compound state")]
    ParentNotCompound { state: String, parent: String },

    #[error("state {0} is its own ancestor")]
    ParentCycle(String),

    #[error("initial state {initial} of {owner} is not one of its children")]
    InvalidInitial { owner: String, initial: String },

    #[error("transition from {state} on {event} targets unknown state {target}")]
    UnknownTarget {
        state: String,
        event: &'static str,
        target: String,
    },

    #[error("final state {0} cannot have transitions, children or invocations")]
    FinalStateNotTerminal(String),

    #[error("state {0} handles invocation results but invokes nothing")]
    CompletionWithoutInvoke(String),

    #[error("state {state} invokes service {invoke} without an error transition")]
    UnhandledServiceError { state: String, invoke: InvokeId },

    #[error("invocation id {0} is used by more than one state")]
    DuplicateInvokeId(InvokeId),
}

fn name<S: fmt::Debug>(state: &S) -> String {
    format!("{:?}", state)
}

/// A validated, immutable machine definition.
pub struct MachineDef<M: Machine> {
    id: &'static str,
    initial: M::State,
    nodes: HashMap<M::State, StateNode<M>>,
    /// Children in declaration order; `None` is the root.
    children: HashMap<Option<M::State>, Vec<M::State>>,
}

impl<M: Machine> MachineDef<M> {
    /// Starts a definition whose root enters `initial` first.
    pub fn builder(id: &'static str, initial: M::State) -> MachineBuilder<M> {
        MachineBuilder {
            id,
            initial,
            nodes: Vec::new(),
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn initial(&self) -> M::State {
        self.initial
    }

    /// All state ids, in no particular order.
    pub fn states(&self) -> impl Iterator<Item = M::State> + '_ {
        self.nodes.keys().copied()
    }

    pub fn get(&self, state: M::State) -> Option<&StateNode<M>> {
        self.nodes.get(&state)
    }

    /// Children of `parent` in declaration order (`None` for top-level states).
    pub fn children(&self, parent: Option<M::State>) -> &[M::State] {
        self.children.get(&parent).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Looks up a state that is known to exist.
    ///
    /// Every id reachable from a validated definition (parents, initials,
    /// targets) was checked by `build`, so the lookup cannot fail for them.
    pub(crate) fn node(&self, state: M::State) -> &StateNode<M> {
        &self.nodes[&state]
    }

    /// Proper ancestors of `state`, outermost first.
    pub fn ancestors(&self, state: M::State) -> Vec<M::State> {
        let mut chain = Vec::new();
        let mut current = self.node(state).parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.node(parent).parent;
        }
        chain.reverse();
        chain
    }

    /// The states entered below `state` by following initial children.
    pub fn initial_descent(&self, state: M::State) -> Vec<M::State> {
        let mut path = Vec::new();
        let mut current = state;
        while let StateKind::Compound { initial } = self.node(current).kind {
            path.push(initial);
            current = initial;
        }
        path
    }

    /// The configuration entered when the machine starts.
    pub fn initial_path(&self) -> Vec<M::State> {
        let mut path = vec![self.initial];
        path.extend(self.initial_descent(self.initial));
        path
    }

    /// The deepest state that is a proper ancestor of both `source` and `target`,
    /// or `None` for the root. States below it are exited and re-entered.
    pub fn transition_domain(&self, source: M::State, target: M::State) -> Option<M::State> {
        let source_chain = self.ancestors(source);
        let target_chain = self.ancestors(target);
        source_chain
            .iter()
            .zip(target_chain.iter())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| *a)
            .last()
    }
}

impl<M: Machine> fmt::Debug for MachineDef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineDef")
            .field("id", &self.id)
            .field("initial", &self.initial)
            .field("states", &self.nodes.len())
            .finish()
    }
}

/// Collects states and validates them into a `MachineDef`.
pub struct MachineBuilder<M: Machine> {
    id: &'static str,
    initial: M::State,
    nodes: Vec<StateNode<M>>,
}

impl<M: Machine> MachineBuilder<M> {
    pub fn state(mut self, node: StateNode<M>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Validates the tree and freezes it.
    pub fn build(self) -> Result<MachineDef<M>, DefinitionError> {
        let mut nodes: HashMap<M::State, StateNode<M>> = HashMap::new();
        let mut children: HashMap<Option<M::State>, Vec<M::State>> = HashMap::new();

        for node in self.nodes {
            if nodes.contains_key(&node.id) {
                return Err(DefinitionError::DuplicateState(name(&node.id)));
            }
            children.entry(node.parent).or_default().push(node.id);
            nodes.insert(node.id, node);
        }

        let mut invoke_ids = HashSet::new();
        for node in nodes.values() {
            let state = name(&node.id);

            if let Some(parent) = node.parent {
                match nodes.get(&parent) {
                    None => {
                        return Err(DefinitionError::UnknownParent {
                            state,
                            parent: name(&parent),
                        });
                    }
                    Some(p) if !matches!(p.kind, StateKind::Compound { .. }) => {
                        return Err(DefinitionError::ParentNotCompound {
                            state,
                            parent: name(&parent),
                        });
                    }
                    Some(_) => {}
                }
            }

            // Any chain longer than the number of states must revisit one.
            let mut depth = 0;
            let mut current = node.parent;
            while let Some(parent) = current {
                depth += 1;
                if depth > nodes.len() {
                    return Err(DefinitionError::ParentCycle(state));
                }
                current = nodes.get(&parent).and_then(|p| p.parent);
            }

            if let StateKind::Compound { initial } = node.kind {
                let is_child = nodes.get(&initial).is_some_and(|c| c.parent == Some(node.id));
                if !is_child {
                    return Err(DefinitionError::InvalidInitial {
                        owner: state,
                        initial: name(&initial),
                    });
                }
            }

            if node.is_final()
                && (node.invoke.is_some()
                    || node.transitions().next().is_some()
                    || children.contains_key(&Some(node.id)))
            {
                return Err(DefinitionError::FinalStateNotTerminal(state));
            }

            for (event, transition) in node.transitions() {
                if !nodes.contains_key(&transition.target) {
                    return Err(DefinitionError::UnknownTarget {
                        state,
                        event,
                        target: name(&transition.target),
                    });
                }
            }

            match &node.invoke {
                None if !node.on_done.is_empty() || !node.on_error.is_empty() => {
                    return Err(DefinitionError::CompletionWithoutInvoke(state));
                }
                Some(invoke) => {
                    if !invoke_ids.insert(invoke.id) {
                        return Err(DefinitionError::DuplicateInvokeId(invoke.id));
                    }
                    if invoke.is_service() && node.on_error.is_empty() {
                        return Err(DefinitionError::UnhandledServiceError {
                            state,
                            invoke: invoke.id,
                        });
                    }
                }
                None => {}
            }
        }

        let root_ok = nodes
            .get(&self.initial)
            .is_some_and(|node| node.parent.is_none());
        if !root_ok {
            return Err(DefinitionError::InvalidInitial {
                owner: "root".to_string(),
                initial: name(&self.initial),
            });
        }

        Ok(MachineDef {
            id: self.id,
            initial: self.initial,
            nodes,
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum S {
        A,
        B,
        Group,
        Inner,
        Other,
        End,
    }

    #[derive(Debug, Clone)]
    enum E {
        Go,
    }

    impl MachineEvent for E {
        fn name(&self) -> &'static str {
            "go"
        }
    }

    #[derive(Debug, Clone)]
    struct T;

    impl Machine for T {
        type State = S;
        type Context = u32;
        type Event = E;
        type Data = u32;
        type Error = String;
    }

    fn ok_service(_: &u32, _: &Event<T>) -> ServiceFuture<T> {
        Box::pin(async { Ok(1) })
    }

    #[test]
    fn builds_a_nested_machine() {
        let def = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A).on("go", Transition::to(S::Group)))
            .state(StateNode::compound(S::Group, S::Inner))
            .state(StateNode::atomic(S::Inner).within(S::Group))
            .state(StateNode::atomic(S::Other).within(S::Group))
            .build()
            .unwrap();

        assert_eq!(def.initial_path(), vec![S::A]);
        assert_eq!(def.initial_descent(S::Group), vec![S::Inner]);
        assert_eq!(def.ancestors(S::Inner), vec![S::Group]);
        assert_eq!(def.children(Some(S::Group)), &[S::Inner, S::Other]);
        assert_eq!(def.children(None), &[S::A, S::Group]);
    }

    #[test]
    fn external_events_are_keyed_by_name() {
        let def = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A).on("go", Transition::to(S::B)))
            .state(StateNode::atomic(S::B))
            .build()
            .unwrap();

        let go = Event::<T>::External(E::Go);
        assert_eq!(go.name(), "go");
        assert_eq!(go.external().map(MachineEvent::name), Some("go"));
        let node = def.get(S::A).unwrap();
        assert_eq!(node.on[go.name()][0].target(), S::B);
        assert_eq!(Event::<T>::Init.name(), "init");
    }

    #[test]
    fn transition_domain_is_deepest_shared_proper_ancestor() {
        let def = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A))
            .state(StateNode::compound(S::Group, S::Inner))
            .state(StateNode::atomic(S::Inner).within(S::Group))
            .state(StateNode::atomic(S::Other).within(S::Group))
            .build()
            .unwrap();

        assert_eq!(def.transition_domain(S::Inner, S::Other), Some(S::Group));
        assert_eq!(def.transition_domain(S::A, S::Inner), None);
        assert_eq!(def.transition_domain(S::Group, S::Inner), None);
        // Self-transitions exit and re-enter the state.
        assert_eq!(def.transition_domain(S::Inner, S::Inner), Some(S::Group));
    }

    #[test]
    fn rejects_duplicate_state() {
        let err = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A))
            .state(StateNode::atomic(S::A))
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateState("A".to_string()));
    }

    #[test]
    fn rejects_unknown_target() {
        let err = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A).on("go", Transition::to(S::B)))
            .build()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownTarget { .. }));
    }

    #[test]
    fn rejects_atomic_parent() {
        let err = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A))
            .state(StateNode::atomic(S::B).within(S::A))
            .build()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::ParentNotCompound { .. }));
    }

    #[test]
    fn rejects_unknown_parent() {
        let err = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A).within(S::Group))
            .build()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownParent { .. }));
    }

    #[test]
    fn rejects_parent_cycle() {
        let err = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A))
            .state(StateNode::compound(S::Group, S::Other).within(S::Other))
            .state(StateNode::compound(S::Other, S::Group).within(S::Group))
            .build()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::ParentCycle(_)));
    }

    #[test]
    fn rejects_initial_that_is_not_a_child() {
        let err = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A))
            .state(StateNode::compound(S::Group, S::A))
            .build()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidInitial { .. }));
    }

    #[test]
    fn rejects_nested_root_initial() {
        let err = MachineDef::<T>::builder("test", S::Inner)
            .state(StateNode::compound(S::Group, S::Inner))
            .state(StateNode::atomic(S::Inner).within(S::Group))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::InvalidInitial {
                owner: "root".to_string(),
                initial: "Inner".to_string()
            }
        );
    }

    #[test]
    fn rejects_final_state_with_transitions() {
        let err = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A))
            .state(StateNode::final_state(S::End).on("go", Transition::to(S::A)))
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::FinalStateNotTerminal("End".to_string()));
    }

    #[test]
    fn rejects_service_without_error_transition() {
        let err = MachineDef::<T>::builder("test", S::A)
            .state(
                StateNode::atomic(S::A)
                    .invoke(Invoke::service("work", ok_service))
                    .on_done(Transition::to(S::B)),
            )
            .state(StateNode::atomic(S::B))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnhandledServiceError {
                state: "A".to_string(),
                invoke: InvokeId("work"),
            }
        );
    }

    #[test]
    fn rejects_completion_without_invoke() {
        let err = MachineDef::<T>::builder("test", S::A)
            .state(StateNode::atomic(S::A).on_done(Transition::to(S::B)))
            .state(StateNode::atomic(S::B))
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::CompletionWithoutInvoke("A".to_string()));
    }

    #[test]
    fn rejects_duplicate_invoke_ids() {
        let err = MachineDef::<T>::builder("test", S::A)
            .state(
                StateNode::atomic(S::A)
                    .invoke(Invoke::service("work", ok_service))
                    .on_error(Transition::to(S::B)),
            )
            .state(
                StateNode::atomic(S::B)
                    .invoke(Invoke::service("work", ok_service))
                    .on_error(Transition::to(S::A)),
            )
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateInvokeId(InvokeId("work")));
    }

    #[test]
    fn data_is_ignored_on_non_final_states() {
        let node = StateNode::<T>::atomic(S::A).data(|ctx, _| *ctx);
        assert!(matches!(node.kind(), StateKind::Atomic));
    }
}
