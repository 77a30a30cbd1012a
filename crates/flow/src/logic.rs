//! Deterministic branching
//!
//! `logic_split` nodes branch on session variables without touching the
//! model. Branches are judged in authored order; the first match wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use callflow_core::VarValue;

/// Comparison operator over a session variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
    NotExists,
}

/// One branch condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicCondition {
    pub variable: String,
    pub op: LogicOp,
    /// Comparison operand; unused for `exists`/`not_exists`
    #[serde(default)]
    pub value: Option<VarValue>,
}

impl LogicCondition {
    /// Evaluate against the session variables.
    ///
    /// Numeric comparisons use the numeric view of both sides, so `"60000"`
    /// extracted as text still compares against `50000`. Equality falls back
    /// to case-insensitive rendered text when either side is not numeric.
    pub fn eval(&self, variables: &HashMap<String, VarValue>) -> bool {
        let current = variables.get(&self.variable);

        match self.op {
            LogicOp::Exists => current.is_some(),
            LogicOp::NotExists => current.is_none(),
            LogicOp::Equals => self.compare_eq(current),
            LogicOp::NotEquals => !self.compare_eq(current),
            LogicOp::Contains => match (current, &self.value) {
                (Some(current), Some(operand)) => current
                    .render()
                    .to_lowercase()
                    .contains(&operand.render().to_lowercase()),
                _ => false,
            },
            LogicOp::GreaterThan => self.compare_numbers(current, |a, b| a > b),
            LogicOp::LessThan => self.compare_numbers(current, |a, b| a < b),
        }
    }

    fn compare_eq(&self, current: Option<&VarValue>) -> bool {
        let (Some(current), Some(operand)) = (current, &self.value) else {
            return false;
        };

        if let (Some(a), Some(b)) = (current.as_number(), operand.as_number()) {
            return a == b;
        }

        current.render().eq_ignore_ascii_case(&operand.render())
    }

    fn compare_numbers(&self, current: Option<&VarValue>, cmp: impl Fn(f64, f64) -> bool) -> bool {
        let (Some(current), Some(operand)) = (current, &self.value) else {
            return false;
        };

        match (current.as_number(), operand.as_number()) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        }
    }
}

/// A branch out of a `logic_split` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicBranch {
    pub when: LogicCondition,
    pub target: String,
}

/// First branch whose condition holds, in authored order.
pub fn first_match<'a>(
    branches: &'a [LogicBranch],
    variables: &HashMap<String, VarValue>,
) -> Option<&'a LogicBranch> {
    branches.iter().find(|branch| branch.when.eval(variables))
}
