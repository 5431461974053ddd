//! A small hierarchical statechart engine.
//!
//! - `model`: immutable, validated machine definitions
//! - `instance`: the pure core that turns events into state changes and effects
//! - `runtime`: the tokio actor shell that executes those effects

pub mod instance;
pub mod model;
pub mod runtime;

pub use instance::{EngineError, Instance, Outcome, Snapshot, Status, Step};
pub use model::{
    DefinitionError, Event, Generation, Invoke, InvokeId, InvokeSrc, Machine, MachineDef,
    MachineEvent, ServiceFuture, StateKind, StateNode, Transition,
};
pub use runtime::{ActorRef, invoke_machine, spawn, spawn_with_token};
