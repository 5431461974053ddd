use super::*;
use crate::statechart::model::{Invoke, MachineEvent, SpawnFn, StateNode, Transition};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ─── Test Machines ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum P {
    Idle,
    Loading,
    Ready,
    Failed,
    Asking,
    Accepted,
    Rejected,
    Closed,
}

#[derive(Debug, Clone)]
enum PE {
    Load,
    Abort,
    Ask,
    Yes,
    No,
    Close,
}

impl MachineEvent for PE {
    fn name(&self) -> &'static str {
        match self {
            PE::Load => "load",
            PE::Abort => "abort",
            PE::Ask => "ask",
            PE::Yes => "yes",
            PE::No => "no",
            PE::Close => "close",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct PCtx {
    value: u32,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct Parent;

impl Machine for Parent {
    type State = P;
    type Context = PCtx;
    type Event = PE;
    type Data = u32;
    type Error = String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum C {
    Wait,
    Yes,
    No,
}

#[derive(Debug, Clone)]
enum CE {
    Yes,
    No,
}

impl MachineEvent for CE {
    fn name(&self) -> &'static str {
        match self {
            CE::Yes => "yes",
            CE::No => "no",
        }
    }
}

#[derive(Debug, Clone)]
struct Child;

impl Machine for Child {
    type State = C;
    type Context = ();
    type Event = CE;
    type Data = u32;
    type Error = String;
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A service that never completes and counts how often it is dropped.
fn pending_service<M: Machine>(drops: Arc<AtomicUsize>) -> ServiceFuture<M> {
    let guard = DropCounter(drops);
    Box::pin(async move {
        let _guard = guard;
        std::future::pending().await
    })
}

fn child_def(drops: Arc<AtomicUsize>) -> Arc<MachineDef<Child>> {
    let def = MachineDef::builder("child", C::Wait)
        .state(
            StateNode::atomic(C::Wait)
                .invoke(Invoke::service("hold", move |_: &(), _: &Event<Child>| {
                    pending_service::<Child>(drops.clone())
                }))
                .on_error(Transition::to(C::Wait))
                .on("yes", Transition::to(C::Yes))
                .on("no", Transition::to(C::No)),
        )
        .state(StateNode::final_state(C::Yes).data(|_: &(), _: &Event<Child>| 1))
        .state(StateNode::final_state(C::No).data(|_: &(), _: &Event<Child>| 0))
        .build()
        .unwrap();
    Arc::new(def)
}

fn parent_def<F>(load: F, child_drops: Arc<AtomicUsize>) -> Arc<MachineDef<Parent>>
where
    F: Fn(&PCtx, &Event<Parent>) -> ServiceFuture<Parent> + Send + Sync + 'static,
{
    let ask = invoke_machine(
        child_def(child_drops),
        |_: &PCtx, _: &Event<Parent>| (),
        |event: &PE| match event {
            PE::Yes => Some(CE::Yes),
            PE::No => Some(CE::No),
            _ => None,
        },
        |data: Option<u32>| data.unwrap_or_default(),
    );

    let def = MachineDef::builder("parent", P::Idle)
        .state(
            StateNode::atomic(P::Idle)
                .on("load", Transition::to(P::Loading))
                .on("ask", Transition::to(P::Asking))
                .on("close", Transition::to(P::Closed)),
        )
        .state(
            StateNode::atomic(P::Loading)
                .invoke(Invoke::service("load", load))
                .on_done(Transition::to(P::Ready).action(|ctx: &PCtx, e: &Event<Parent>| PCtx {
                    value: e.data().copied().unwrap_or_default(),
                    ..ctx.clone()
                }))
                .on_error(Transition::to(P::Failed).action(|ctx: &PCtx, e: &Event<Parent>| PCtx {
                    error: e.error().cloned(),
                    ..ctx.clone()
                }))
                .on("abort", Transition::to(P::Idle)),
        )
        .state(StateNode::atomic(P::Ready).on("load", Transition::to(P::Loading)))
        .state(StateNode::atomic(P::Failed))
        .state(
            StateNode::atomic(P::Asking)
                .invoke(Invoke::new("ask", ask).forward_events())
                .on_done(
                    Transition::to(P::Accepted)
                        .guard(|_: &PCtx, e: &Event<Parent>| e.data() == Some(&1)),
                )
                .on_done(Transition::to(P::Rejected))
                .on("abort", Transition::to(P::Idle)),
        )
        .state(StateNode::atomic(P::Accepted))
        .state(StateNode::atomic(P::Rejected))
        .state(StateNode::final_state(P::Closed).data(|ctx: &PCtx, _: &Event<Parent>| ctx.value))
        .build()
        .unwrap();
    Arc::new(def)
}

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

async fn until(condition: impl Fn() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

fn immediate(
    value: u32,
) -> impl Fn(&PCtx, &Event<Parent>) -> ServiceFuture<Parent> + Send + Sync + 'static {
    move |_: &PCtx, _: &Event<Parent>| -> ServiceFuture<Parent> { Box::pin(async move { Ok(value) }) }
}

// ─── Services ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn service_completion_drives_transition() {
    let actor = spawn(parent_def(immediate(42), Arc::default()), PCtx::default());

    assert!(actor.send(PE::Load));
    let snapshot = within(actor.wait_for(|s| s.matches(P::Ready)))
        .await
        .unwrap();

    assert_eq!(snapshot.context.value, 42);
}

#[tokio::test]
async fn service_failure_takes_error_transition() {
    let failing = |_: &PCtx, _: &Event<Parent>| -> ServiceFuture<Parent> {
        Box::pin(async { Err("boom".to_string()) })
    };
    let actor = spawn(parent_def(failing, Arc::default()), PCtx::default());

    actor.send(PE::Load);
    let snapshot = within(actor.wait_for(|s| s.matches(P::Failed)))
        .await
        .unwrap();

    assert_eq!(snapshot.context.error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn dispatch_returns_snapshot_after_processing() {
    let actor = spawn(
        parent_def(
            |_: &PCtx, _: &Event<Parent>| pending_service::<Parent>(Arc::default()),
            Arc::default(),
        ),
        PCtx::default(),
    );

    let snapshot = within(actor.dispatch(PE::Load)).await.unwrap();
    assert_eq!(snapshot.leaf(), Some(P::Loading));
    assert_eq!(actor.snapshot().leaf(), Some(P::Loading));
}

#[tokio::test]
async fn leaving_state_cancels_running_service() {
    let drops = Arc::new(AtomicUsize::new(0));
    let load_drops = drops.clone();
    let actor = spawn(
        parent_def(
            move |_: &PCtx, _: &Event<Parent>| pending_service::<Parent>(load_drops.clone()),
            Arc::default(),
        ),
        PCtx::default(),
    );

    within(actor.dispatch(PE::Load)).await;
    let snapshot = within(actor.dispatch(PE::Abort)).await.unwrap();

    assert_eq!(snapshot.leaf(), Some(P::Idle));
    until(|| drops.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn events_are_processed_in_submission_order() {
    let actor = spawn(
        parent_def(
            |_: &PCtx, _: &Event<Parent>| pending_service::<Parent>(Arc::default()),
            Arc::default(),
        ),
        PCtx::default(),
    );

    actor.send(PE::Load);
    actor.send(PE::Abort);
    actor.send(PE::Ask);
    let snapshot = within(actor.dispatch(PE::Load)).await.unwrap();

    // `load` is not handled while asking.
    assert_eq!(snapshot.leaf(), Some(P::Asking));
}

// ─── Child Actors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn forwarded_event_completes_child_and_parent_takes_done() {
    let actor = spawn(parent_def(immediate(0), Arc::default()), PCtx::default());

    within(actor.dispatch(PE::Ask)).await;
    actor.send(PE::Yes);

    within(actor.wait_for(|s| s.matches(P::Accepted)))
        .await
        .unwrap();
}

#[tokio::test]
async fn child_output_is_mapped_into_parent_payload() {
    let actor = spawn(parent_def(immediate(0), Arc::default()), PCtx::default());

    within(actor.dispatch(PE::Ask)).await;
    actor.send(PE::No);

    within(actor.wait_for(|s| s.matches(P::Rejected)))
        .await
        .unwrap();
}

#[tokio::test]
async fn finished_child_is_released() {
    let forward_drops = Arc::new(AtomicUsize::new(0));
    let drops = forward_drops.clone();
    let spawn_child: SpawnFn<Parent> = Arc::new(
        move |_: &PCtx, _: &Event<Parent>, _: CancellationToken| {
            let guard = DropCounter(drops.clone());
            let done: ServiceFuture<Parent> = Box::pin(async { Ok(7) });
            ChildActor {
                done,
                forward: Box::new(move |_: &PE| {
                    let _held = &guard;
                }),
            }
        },
    );
    let def = MachineDef::<Parent>::builder("parent", P::Idle)
        .state(StateNode::atomic(P::Idle).on("ask", Transition::to(P::Asking)))
        .state(
            StateNode::atomic(P::Asking)
                .invoke(Invoke::new("ask", InvokeSrc::Actor(spawn_child)).forward_events())
                .on_done(Transition::to(P::Accepted)),
        )
        .state(StateNode::atomic(P::Accepted))
        .build()
        .unwrap();
    let actor = spawn(Arc::new(def), PCtx::default());

    actor.send(PE::Ask);
    within(actor.wait_for(|s| s.matches(P::Accepted)))
        .await
        .unwrap();

    // Still running, so only the completion can have released the child.
    assert!(actor.snapshot().is_active());
    until(|| forward_drops.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn leaving_invoking_state_stops_child() {
    let child_drops = Arc::new(AtomicUsize::new(0));
    let actor = spawn(parent_def(immediate(0), child_drops.clone()), PCtx::default());

    within(actor.dispatch(PE::Ask)).await;
    let snapshot = within(actor.dispatch(PE::Abort)).await.unwrap();

    assert_eq!(snapshot.leaf(), Some(P::Idle));
    until(|| child_drops.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn stop_is_recursive() {
    let child_drops = Arc::new(AtomicUsize::new(0));
    let actor = spawn(parent_def(immediate(0), child_drops.clone()), PCtx::default());

    within(actor.dispatch(PE::Ask)).await;
    actor.stop();
    actor.stop();

    let snapshot = within(actor.wait_for(|s| !s.is_active())).await.unwrap();
    assert_eq!(snapshot.status, Status::Stopped);
    until(|| child_drops.load(Ordering::SeqCst) == 1).await;
    until(|| actor.is_terminated()).await;
    assert!(!actor.send(PE::Load));
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reaching_root_final_state_terminates_actor() {
    let actor = spawn(parent_def(immediate(9), Arc::default()), PCtx::default());

    actor.send(PE::Close);

    let snapshot = within(actor.wait_for(|s| !s.is_active())).await.unwrap();
    assert_eq!(snapshot.status, Status::Done(Some(0)));
    until(|| actor.is_terminated()).await;
    assert!(actor.dispatch(PE::Load).await.is_none());
}

#[tokio::test]
async fn drop_guard_stops_actor() {
    let actor = spawn(parent_def(immediate(0), Arc::default()), PCtx::default());

    {
        let _guard = actor.drop_guard();
    }

    until(|| actor.is_terminated()).await;
    assert_eq!(actor.snapshot().status, Status::Stopped);
}

#[tokio::test]
async fn subscribers_are_notified_after_each_event() {
    let actor = spawn(parent_def(immediate(0), Arc::default()), PCtx::default());
    let mut rx = actor.subscribe();
    let _ = rx.borrow_and_update();

    within(actor.dispatch(PE::Abort)).await;
    // Unhandled events still produce a notification.
    assert!(rx.has_changed().unwrap());
    let _ = rx.borrow_and_update();

    within(actor.dispatch(PE::Ask)).await;
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().leaf(), Some(P::Asking));
}
