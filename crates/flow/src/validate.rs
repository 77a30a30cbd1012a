//! Input validation for `collect_input` nodes
//!
//! Deterministic format checks that never call the model. Validation is
//! idempotent: feeding a previously accepted value back through always
//! succeeds, so a re-entered node can not reject what it already stored.

use once_cell::sync::Lazy;
use regex::Regex;

use callflow_core::VarValue;
use crate::node::InputType;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").expect("email pattern compiles")
});

/// Validate and normalize raw caller input for the given type.
///
/// Returns the stored value on success, `None` on a format failure.
pub fn validate(input_type: InputType, raw: &str) -> Option<VarValue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    match input_type {
        InputType::Text => Some(VarValue::Text(trimmed.to_string())),

        InputType::Email => {
            let lowered = trimmed.to_lowercase();
            EMAIL
                .is_match(&lowered)
                .then(|| VarValue::Text(lowered))
        }

        InputType::Phone => {
            let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
            (10..=15)
                .contains(&digits.len())
                .then(|| VarValue::Text(digits))
        }

        InputType::Number => {
            // Spoken numbers arrive with currency marks and separators.
            let cleaned: String = trimmed
                .chars()
                .filter(|c| !matches!(c, ',' | '$' | ' '))
                .collect();
            cleaned.parse::<f64>().ok().map(VarValue::Number)
        }
    }
}

/// Per-type re-prompt used when the node declares none.
pub fn default_reprompt(input_type: InputType) -> &'static str {
    match input_type {
        InputType::Text => "Sorry, I didn't catch that. Could you say it again?",
        InputType::Email => "That doesn't look like an email address. Could you spell it out?",
        InputType::Phone => "That doesn't look like a phone number. Could you repeat it?",
        InputType::Number => "Sorry, I need that as a number. Could you say it again?",
    }
}
