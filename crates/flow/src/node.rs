//! Node types
//!
//! The authored shape of a flow node. Nodes are deserialized once at load
//! time and never mutated; all per-call state lives in the session.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use callflow_extract::VariableSpec;
use callflow_tools::WebhookSpec;

/// One node in the flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: NodeKind,

    /// Natural-language transitions, judged in priority order
    #[serde(default)]
    pub transitions: Vec<Transition>,

    /// Unconditional follow-on target, taken when the node's work is done
    /// and no transition condition matched. Required for `collect_input`,
    /// `extract_variable`, `function_call` and `send_message` nodes.
    #[serde(default)]
    pub next: Option<String>,
}

/// A natural-language transition out of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Condition judged against the latest exchange
    pub condition: String,
    /// Target node id
    pub target: String,
}

/// What a node does, tagged by `kind` in the flow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Free conversation toward a goal, with optional variable extraction
    /// and optional knowledge grounding.
    Conversation {
        /// What the agent is trying to accomplish on this node
        goal: String,
        /// Fixed opening line; spoken on entry instead of a generated one
        #[serde(default)]
        script: Option<String>,
        /// Variables extracted from the exchange before any transition
        #[serde(default)]
        extract: Vec<VariableSpec>,
        /// Consult the knowledge router when replying
        #[serde(default)]
        use_knowledge: bool,
    },

    /// Deterministic input collection with format validation.
    CollectInput {
        variable: String,
        input_type: InputType,
        prompt: String,
        /// Spoken when validation fails; a per-type default applies otherwise
        #[serde(default)]
        reprompt: Option<String>,
    },

    /// AI extraction of a single field, re-prompting until satisfied.
    ExtractVariable {
        prompt: String,
        spec: VariableSpec,
    },

    /// Deterministic branch over session variables. Pass-through: the caller
    /// never lands here.
    LogicSplit {
        branches: Vec<crate::logic::LogicBranch>,
        /// Fallback target when no branch matches
        #[serde(default)]
        otherwise: Option<String>,
    },

    /// DTMF menu: waits for a digit and routes by the mapping.
    PressDigit {
        prompt: String,
        /// Digit (as a one-character string) to target node
        mappings: HashMap<String, String>,
        #[serde(default)]
        invalid_reprompt: Option<String>,
    },

    /// Webhook call. Pass-through; continues to `next` (or `on_error`).
    FunctionCall {
        call: WebhookSpec,
        /// Target when the call fails or times out; `next` applies otherwise
        #[serde(default)]
        on_error: Option<String>,
    },

    /// Warm or cold hand-off to a human. Terminal.
    Transfer {
        destination: String,
        #[serde(default)]
        announcement: Option<String>,
    },

    /// Out-of-band message to the caller. Pass-through.
    SendMessage {
        message: String,
        #[serde(default)]
        channel: MessageChannel,
    },

    /// Hang up. Terminal.
    End {
        #[serde(default)]
        farewell: Option<String>,
    },
}

impl NodeKind {
    /// Goal text handed to the condition evaluator.
    pub fn goal(&self) -> &str {
        match self {
            NodeKind::Conversation { goal, .. } => goal,
            NodeKind::CollectInput { prompt, .. } => prompt,
            NodeKind::ExtractVariable { prompt, .. } => prompt,
            NodeKind::PressDigit { prompt, .. } => prompt,
            _ => "",
        }
    }

    /// Terminal nodes end the machine; no transitions leave them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeKind::Transfer { .. } | NodeKind::End { .. })
    }

    /// Pass-through nodes do their work and continue without waiting for
    /// caller input.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            NodeKind::LogicSplit { .. }
                | NodeKind::FunctionCall { .. }
                | NodeKind::SendMessage { .. }
        )
    }
}

/// Validated input formats for `collect_input` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Text,
    Email,
    Phone,
    Number,
}

/// Delivery channel for `send_message` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    Sms,
    Email,
}

impl Default for MessageChannel {
    fn default() -> Self {
        MessageChannel::Sms
    }
}
