//! The async shell around `Instance`.
//!
//! Each spawned machine becomes an actor: one tokio task owning an `Instance`,
//! reading events from an unbounded mailbox one at a time. Effects returned by
//! the core are executed here: services run on their own tasks, child machines
//! are spawned as nested actors, and both report back through the mailbox.
//!
//! Every invocation runs under a child of the actor's `CancellationToken`, so
//! stopping an actor stops everything it started, recursively.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, error, info_span, trace};

use super::instance::{Effect, Instance, Outcome, Snapshot, StartInvocation, Status};
use super::model::{
    ChildActor, Event, Generation, InvokeId, InvokeSrc, Machine, MachineDef, MachineEvent,
    ServiceFuture,
};

struct Envelope<M: Machine> {
    event: Event<M>,
    ack: Option<oneshot::Sender<Snapshot<M>>>,
}

/// A handle to a running actor.
///
/// Handles are cheap to clone. Dropping every handle does not stop the actor;
/// use `stop` or `drop_guard` for that.
#[derive(Clone)]
pub struct ActorRef<M: Machine> {
    machine: &'static str,
    mailbox: mpsc::UnboundedSender<Envelope<M>>,
    snapshot: watch::Receiver<Snapshot<M>>,
    token: CancellationToken,
}

impl<M: Machine> std::fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef")
            .field("machine", &self.machine)
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

impl<M: Machine> ActorRef<M> {
    /// Queues an event. Returns false if the actor has already terminated.
    pub fn send(&self, event: M::Event) -> bool {
        self.mailbox
            .send(Envelope {
                event: Event::External(event),
                ack: None,
            })
            .is_ok()
    }

    /// Queues an event and waits until it has been processed.
    ///
    /// Returns the snapshot right after processing, or `None` if the actor
    /// terminated before getting to it.
    pub async fn dispatch(&self, event: M::Event) -> Option<Snapshot<M>> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(Envelope {
                event: Event::External(event),
                ack: Some(tx),
            })
            .ok()?;
        rx.await.ok()
    }

    /// The state as of the last processed event.
    pub fn snapshot(&self) -> Snapshot<M> {
        self.snapshot.borrow().clone()
    }

    /// A receiver notified after every processed event.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<M>> {
        self.snapshot.clone()
    }

    /// Waits until a snapshot satisfies `predicate`, checking the current one first.
    ///
    /// Returns `None` if the actor terminates without ever satisfying it.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&Snapshot<M>) -> bool,
    ) -> Option<Snapshot<M>> {
        let mut rx = self.snapshot.clone();
        rx.wait_for(predicate).await.ok().map(|s| s.clone())
    }

    /// Stops the actor and everything it invoked. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// A guard that stops the actor when dropped.
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    /// True once the actor task has exited.
    pub fn is_terminated(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub fn machine(&self) -> &'static str {
        self.machine
    }
}

/// Spawns a top-level actor. Must be called from within a tokio runtime.
pub fn spawn<M: Machine>(def: Arc<MachineDef<M>>, context: M::Context) -> ActorRef<M> {
    spawn_with_token(def, context, CancellationToken::new())
}

/// Spawns an actor that stops when `token` is cancelled.
pub fn spawn_with_token<M: Machine>(
    def: Arc<MachineDef<M>>,
    context: M::Context,
    token: CancellationToken,
) -> ActorRef<M> {
    let machine = def.id();
    let mut instance = Instance::new(def, context);
    let effects = instance.start();

    let (tx, rx) = mpsc::unbounded_channel();
    let (publisher, snapshot) = watch::channel(instance.snapshot());

    let mut actor = Actor {
        machine,
        instance,
        mailbox: tx.clone(),
        running: HashMap::new(),
        token: token.clone(),
        publisher,
    };
    actor.execute(effects);
    actor.publish();

    tokio::spawn(
        actor
            .run(rx)
            .instrument(info_span!("actor", machine = machine)),
    );

    ActorRef {
        machine,
        mailbox: tx,
        snapshot,
        token,
    }
}

/// Builds an invocation source that runs `def` as a child actor.
///
/// `context` derives the child's context from the parent's, `forward` maps
/// forwarded parent events to child events (or drops them), and `output` maps
/// the child's final data to the parent's completion payload.
pub fn invoke_machine<P, C, Ctx, Fwd, Out>(
    def: Arc<MachineDef<C>>,
    context: Ctx,
    forward: Fwd,
    output: Out,
) -> InvokeSrc<P>
where
    P: Machine,
    C: Machine,
    Ctx: Fn(&P::Context, &Event<P>) -> C::Context + Send + Sync + 'static,
    Fwd: Fn(&P::Event) -> Option<C::Event> + Send + Sync + 'static,
    Out: Fn(Option<C::Data>) -> P::Data + Send + Sync + 'static,
{
    let forward = Arc::new(forward);
    let output = Arc::new(output);

    InvokeSrc::Actor(Arc::new(
        move |parent_ctx: &P::Context, event: &Event<P>, token: CancellationToken| {
            let child = spawn_with_token(def.clone(), context(parent_ctx, event), token);

            let mailbox = child.clone();
            let forward = forward.clone();
            let output = output.clone();

            let done: ServiceFuture<P> = Box::pin(async move {
                let finished = child.wait_for(|s| !s.is_active()).await;
                match finished.map(|s| s.status) {
                    Some(Status::Done(data)) => Ok(output(data)),
                    // Stopped: the invocation is being cancelled alongside it.
                    _ => std::future::pending().await,
                }
            });

            ChildActor {
                done,
                forward: Box::new(move |event: &P::Event| {
                    if let Some(event) = forward(event) {
                        mailbox.send(event);
                    }
                }),
            }
        },
    ))
}

struct Running<M: Machine> {
    generation: Generation,
    token: CancellationToken,
    forward: Option<Box<dyn Fn(&M::Event) + Send + Sync>>,
}

struct Actor<M: Machine> {
    machine: &'static str,
    instance: Instance<M>,
    /// Completions of invocations come back through here.
    mailbox: mpsc::UnboundedSender<Envelope<M>>,
    running: HashMap<InvokeId, Running<M>>,
    token: CancellationToken,
    publisher: watch::Sender<Snapshot<M>>,
}

impl<M: Machine> Actor<M> {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Envelope<M>>) {
        debug!(machine = self.machine, "Actor started");
        let token = self.token.clone();

        while self.instance.is_active() {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!(machine = self.machine, "Actor cancelled");
                    break;
                }

                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.handle(envelope),
                    None => break,
                }
            }
        }

        let effects = self.instance.stop();
        self.execute(effects);
        for (_, running) in self.running.drain() {
            running.token.cancel();
        }
        self.publish();
        debug!(machine = self.machine, status = ?self.instance.status(), "Actor stopped");
    }

    fn handle(&mut self, envelope: Envelope<M>) {
        let Envelope { event, ack } = envelope;
        let name = event.name();
        self.settle(&event);

        match self.instance.send(event) {
            Ok(step) => {
                match step.outcome {
                    Outcome::Transitioned => {
                        debug!(machine = self.machine, event = name, path = ?self.instance.path(), "Processed event");
                    }
                    outcome => {
                        trace!(machine = self.machine, event = name, ?outcome, "Event had no effect");
                    }
                }
                self.execute(step.effects);
            }
            Err(e) => {
                error!(machine = self.machine, event = name, error = %e, "Rejected event");
            }
        }

        let snapshot = self.publish();
        if let Some(ack) = ack {
            // The caller may have stopped waiting.
            let _ = ack.send(snapshot);
        }
    }

    fn publish(&self) -> Snapshot<M> {
        let snapshot = self.instance.snapshot();
        self.publisher.send_replace(snapshot.clone());
        snapshot
    }

    fn execute(&mut self, effects: Vec<Effect<M>>) {
        for effect in effects {
            match effect {
                Effect::Start(start) => self.start(start),
                Effect::Cancel { id, generation } => self.cancel(id, generation),
                Effect::Forward {
                    id,
                    generation,
                    event,
                } => {
                    if let Some(running) = self.running.get(&id)
                        && running.generation == generation
                        && let Some(forward) = &running.forward
                    {
                        trace!(machine = self.machine, invoke = %id, event = event.name(), "Forwarding event");
                        forward(&event);
                    }
                }
            }
        }
    }

    fn start(&mut self, start: StartInvocation<M>) {
        let StartInvocation {
            id,
            generation,
            src,
            context,
            event,
        } = start;
        debug!(machine = self.machine, invoke = %id, %generation, "Starting invocation");

        let token = self.token.child_token();
        let (future, forward) = match src {
            InvokeSrc::Service(service) => (service(&context, &event), None),
            InvokeSrc::Actor(spawn_child) => {
                let child = spawn_child(&context, &event, token.clone());
                (child.done, Some(child.forward))
            }
        };

        tokio::spawn(listen(
            self.machine,
            id,
            generation,
            future,
            token.clone(),
            self.mailbox.clone(),
        ));
        self.running.insert(
            id,
            Running {
                generation,
                token,
                forward,
            },
        );
    }

    /// Forgets an invocation whose completion for the current generation arrived.
    fn settle(&mut self, event: &Event<M>) {
        let (Event::Done { id, generation, .. } | Event::Error { id, generation, .. }) = event
        else {
            return;
        };
        if self
            .running
            .get(id)
            .is_some_and(|r| r.generation == *generation)
        {
            trace!(machine = self.machine, invoke = %id, %generation, "Invocation finished");
            self.running.remove(id);
        }
    }

    fn cancel(&mut self, id: InvokeId, generation: Generation) {
        if self
            .running
            .get(&id)
            .is_some_and(|r| r.generation == generation)
            && let Some(running) = self.running.remove(&id)
        {
            debug!(machine = self.machine, invoke = %id, %generation, "Cancelling invocation");
            running.token.cancel();
        }
    }
}

/// Waits for one invocation and reports its outcome to the owning actor.
async fn listen<M: Machine>(
    machine: &'static str,
    id: InvokeId,
    generation: Generation,
    future: ServiceFuture<M>,
    token: CancellationToken,
    mailbox: mpsc::UnboundedSender<Envelope<M>>,
) {
    let event = tokio::select! {
        _ = token.cancelled() => {
            trace!(machine, invoke = %id, %generation, "Invocation cancelled");
            return;
        }
        result = future => match result {
            Ok(data) => Event::Done { id, generation, data },
            Err(error) => Event::Error { id, generation, error },
        },
    };

    if mailbox.send(Envelope { event, ack: None }).is_err() {
        trace!(machine, invoke = %id, "Actor gone before completion arrived");
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
