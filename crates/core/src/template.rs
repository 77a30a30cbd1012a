//! `{{name}}` template substitution
//!
//! All spoken/script text and webhook body templates pass through this
//! before leaving the engine.

use std::collections::HashMap;

use crate::value::VarValue;

/// Replace `{{name}}` tokens with rendered variable values.
///
/// Unknown names are left in place so a misauthored template is audible in
/// testing instead of silently dropping words.
pub fn render(template: &str, variables: &HashMap<String, VarValue>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match variables.get(name) {
                    Some(value) => out.push_str(&value.render()),
                    None => {
                        out.push_str("{{");
                        out.push_str(&after[..end]);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated token: emit as-is
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}
