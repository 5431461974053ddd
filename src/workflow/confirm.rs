//! The confirmation dialog, as a child machine.
//!
//! Holds the pending pick request and finishes as soon as the operator
//! answers. Its output is the `Decision`.

use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::statechart::{
    DefinitionError, Machine, MachineDef, MachineEvent, StateNode, Transition,
};
use crate::types::PickRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmState {
    Ask,
    Confirmed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmEvent {
    Confirm,
    Cancel,
}

impl MachineEvent for ConfirmEvent {
    fn name(&self) -> &'static str {
        match self {
            ConfirmEvent::Confirm => "confirm",
            ConfirmEvent::Cancel => "cancel",
        }
    }
}

/// The operator's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Confirmed { request: PickRequest },
    Canceled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmContext {
    pub request: Option<PickRequest>,
}

#[derive(Debug, Clone)]
pub struct ConfirmMachine;

impl Machine for ConfirmMachine {
    type State = ConfirmState;
    type Context = ConfirmContext;
    type Event = ConfirmEvent;
    type Data = Decision;
    type Error = Infallible;
}

pub fn confirm_machine() -> Result<MachineDef<ConfirmMachine>, DefinitionError> {
    MachineDef::builder("confirm", ConfirmState::Ask)
        .state(
            StateNode::atomic(ConfirmState::Ask)
                .on("confirm", Transition::to(ConfirmState::Confirmed))
                .on("cancel", Transition::to(ConfirmState::Canceled)),
        )
        .state(
            StateNode::final_state(ConfirmState::Confirmed).data(|ctx: &ConfirmContext, _| {
                match &ctx.request {
                    Some(request) => Decision::Confirmed {
                        request: request.clone(),
                    },
                    None => Decision::Canceled,
                }
            }),
        )
        .state(StateNode::final_state(ConfirmState::Canceled).data(|_, _| Decision::Canceled))
        .build()
}
