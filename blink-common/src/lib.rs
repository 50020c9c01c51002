//! Shared models, wire types and collaborator traits for blink action execution.
//!
//! Everything in this crate is free of I/O: the HTTP side lives in `blink-client`, which
//! implements the traits declared in [`traits`].
pub mod dto;
pub mod models;
pub mod traits;

pub use models::{
    action::Action,
    component::{Component, ComponentId},
    execution::{reduce, ExecutionEvent, ExecutionState, ExecutionStatus},
    trust::{TrustAssessment, TrustState},
};

/// Fallback shown to the user when a failure carries no usable message.
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error, please try again";
