//! Declared numeric derivations
//!
//! Post-processing of extracted numbers (a monthly figure from a yearly one)
//! is declared on the variable spec and computed deterministically from the
//! extracted value, never via ad hoc text manipulation.

use serde::{Deserialize, Serialize};

/// Arithmetic applied to the extracted numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "by", rename_all = "snake_case")]
pub enum TransformOp {
    Divide(f64),
    Multiply(f64),
}

impl TransformOp {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            TransformOp::Divide(d) => value / d,
            TransformOp::Multiply(m) => value * m,
        }
    }
}

/// A variable derived from another variable's numeric value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedVariable {
    /// Name of the derived variable in the session
    pub name: String,

    /// Arithmetic to apply, flattened into the spec document
    #[serde(flatten)]
    pub op: TransformOp,

    /// Round the result to the nearest integer
    #[serde(default)]
    pub round: bool,
}

impl DerivedVariable {
    pub fn compute(&self, source: f64) -> f64 {
        let value = self.op.apply(source);
        if self.round {
            value.round()
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monthly_from_yearly() {
        let derived = DerivedVariable {
            name: "monthly_income".to_string(),
            op: TransformOp::Divide(12.0),
            round: true,
        };
        assert_eq!(derived.compute(60000.0), 5000.0);
    }

    #[test]
    fn test_flat_document_form() {
        let derived: DerivedVariable = serde_json::from_str(
            r#"{"name": "monthly_income", "op": "divide", "by": 12.0, "round": true}"#,
        )
        .unwrap();
        assert_eq!(derived.op, TransformOp::Divide(12.0));
        assert!(derived.round);
    }

    #[test]
    fn test_unrounded() {
        let derived = DerivedVariable {
            name: "weekly".to_string(),
            op: TransformOp::Divide(2.0),
            round: false,
        };
        assert_eq!(derived.compute(5.0), 2.5);
    }
}
