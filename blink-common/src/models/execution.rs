//! Execution state machine.
//!
//! [`reduce`] is a pure function over [`ExecutionState`]; every transition returns a new value.
//! Events that are not valid in the current status return the state unchanged.
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::models::component::ComponentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExecutionStatus {
    #[default]
    CheckingSupportability,
    Idle,
    Executing,
    Success,
    Error,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    pub executing_action: Option<ComponentId>,
    pub error_message: Option<String>,
    pub success_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    CheckSupportability,
    Reset,
    Initiate(ComponentId),
    Finish(Option<String>),
    Fail(String),
    SoftReset(Option<String>),
    Block,
    Unblock,
}

pub fn reduce(state: &ExecutionState, event: ExecutionEvent) -> ExecutionState {
    use ExecutionStatus::*;

    match (state.status, event) {
        (_, ExecutionEvent::CheckSupportability) => {
            ExecutionState { status: CheckingSupportability, ..Default::default() }
        }
        (_, ExecutionEvent::Reset) => ExecutionState { status: Idle, ..Default::default() },
        (Idle, ExecutionEvent::Initiate(component)) => ExecutionState {
            status: Executing,
            executing_action: Some(component),
            error_message: None,
            success_message: None,
        },
        (Executing, ExecutionEvent::Finish(message)) => ExecutionState {
            status: Success,
            executing_action: None,
            error_message: None,
            success_message: message,
        },
        (_, ExecutionEvent::Fail(message)) => ExecutionState {
            status: Error,
            executing_action: None,
            error_message: Some(message),
            success_message: None,
        },
        (Executing, ExecutionEvent::SoftReset(message)) => ExecutionState {
            status: Idle,
            executing_action: None,
            error_message: message,
            success_message: None,
        },
        (_, ExecutionEvent::Block) => ExecutionState { status: Blocked, ..state.clone() },
        (Blocked, ExecutionEvent::Unblock) => ExecutionState { status: Idle, ..Default::default() },
        _ => state.clone(),
    }
}

impl ExecutionState {
    pub fn is_idle(&self) -> bool {
        self.status == ExecutionStatus::Idle
    }
}
