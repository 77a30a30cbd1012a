//! Variable specifications
//!
//! Authored per node in the flow document; never mutated at runtime. Only the
//! session's extracted values change.

use serde::{Deserialize, Serialize};

use crate::transform::DerivedVariable;

/// Specification of one extractable variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Variable name as stored in the session
    pub name: String,

    /// Natural-language description of what to extract
    pub instruction: String,

    /// Mandatory variables block the node's transition until satisfied
    #[serde(default)]
    pub mandatory: bool,

    /// Re-extract on every turn even when a value already exists
    #[serde(default)]
    pub allow_update: bool,

    /// Spoken re-prompt when a mandatory variable stays absent
    #[serde(default)]
    pub reprompt: Option<String>,

    /// Deterministic numeric derivations computed from this value
    #[serde(default)]
    pub derive: Vec<DerivedVariable>,
}

impl VariableSpec {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            mandatory: false,
            allow_update: false,
            reprompt: None,
            derive: Vec::new(),
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn allow_update(mut self) -> Self {
        self.allow_update = true;
        self
    }

    pub fn with_reprompt(mut self, reprompt: impl Into<String>) -> Self {
        self.reprompt = Some(reprompt.into());
        self
    }

    pub fn with_derived(mut self, derived: DerivedVariable) -> Self {
        self.derive.push(derived);
        self
    }

    /// Re-prompt text, falling back to a generic request
    pub fn reprompt_text(&self) -> String {
        self.reprompt
            .clone()
            .unwrap_or_else(|| format!("Sorry, could you tell me your {}?", self.name))
    }
}
