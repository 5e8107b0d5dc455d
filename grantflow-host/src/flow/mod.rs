//! The per-request grant flow
//!
//! [`state`] holds the decision records a request accumulates; [`engine`]
//! drives them from initialization through prompts and reconciliation to
//! the final result. One flow handles exactly one request; a suspended
//! flow is rebuilt from the same request plus a [`state::FlowSnapshot`].

pub mod engine;
pub mod state;

pub use engine::{GrantFlow, GrantStart};
pub use state::{Decision, FlowSnapshot, GroupInfo, GroupState, GroupStateTable};
