//! Flow State Machine
//!
//! A call is scripted as a directed graph of typed nodes: conversation,
//! input collection, extraction, branching, DTMF menus, webhook calls,
//! transfers and endings. This crate owns the graph document format, its
//! validation, and the state machine that advances one node per caller turn.
//!
//! The machine is pure orchestration: it holds no session state of its own
//! and no timing. The engine crate owns the session and calls
//! [`FlowMachine::advance`] with the session's variables and history.

pub mod graph;
pub mod logic;
pub mod machine;
pub mod node;
pub mod validate;

pub use graph::FlowGraph;
pub use logic::{LogicBranch, LogicCondition, LogicOp};
pub use machine::{FlowMachine, SideEffect, TerminalAction, TurnInput, TurnOutcome};
pub use node::{InputType, MessageChannel, Node, NodeKind, Transition};

use thiserror::Error;

/// Flow errors
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    #[error("Flow has no node named '{0}' to start from")]
    NoStartNode(String),

    #[error("Node '{0}' is unreachable from the start node")]
    UnreachableNode(String),

    #[error("Node '{0}' requires a 'next' target")]
    MissingNext(String),

    #[error("Logic split '{0}' matched no branch and has no 'otherwise'")]
    NoBranchMatched(String),

    #[error("Pass-through chain from '{0}' exceeded the hop limit")]
    HopLimit(String),

    #[error("Flow document error: {0}")]
    Parse(#[from] serde_json::Error),
}
