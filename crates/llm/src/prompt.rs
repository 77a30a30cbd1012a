//! Prompt building
//!
//! Constructs the {system context, conversation history, instruction}
//! request shape consumed by the model backend.

use serde::{Deserialize, Serialize};
use std::fmt;

use callflow_core::{ConversationHistory, Speaker};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Prompt builder
///
/// Assembles system context, a window of conversation history, and the
/// per-turn instruction into a message list.
pub struct PromptBuilder {
    messages: Vec<Message>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Add the system context block
    pub fn system(mut self, context: impl Into<String>) -> Self {
        self.messages.push(Message::system(context));
        self
    }

    /// Add a window of conversation history as alternating user/assistant
    /// messages. The caller's words become user messages.
    pub fn history(mut self, history: &ConversationHistory, window: usize) -> Self {
        for entry in history.recent(window) {
            let message = match entry.speaker {
                Speaker::Caller => Message::user(entry.text.clone()),
                Speaker::Agent => Message::assistant(entry.text.clone()),
            };
            self.messages.push(message);
        }
        self
    }

    /// Add the per-turn instruction as the final user message
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.messages.push(Message::user(instruction));
        self
    }

    /// Add a pre-built message
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn build(self) -> Vec<Message> {
        self.messages
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the first JSON object from free-form model output.
///
/// Models often wrap structured answers in prose or markdown fences; callers
/// that asked for JSON use this to dig it out.
pub fn extract_json_object(response: &str) -> Option<serde_json::Value> {
    let start = response.find('{')?;

    // Walk to the matching close brace, respecting strings.
    let bytes = response.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&response[start..=i]).ok();
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use callflow_core::HistoryEntry;

    #[test]
    fn test_builder_ordering() {
        let mut history = ConversationHistory::new();
        history.push(HistoryEntry::agent("Hi there"));
        history.push(HistoryEntry::caller("hello"));

        let messages = PromptBuilder::new()
            .system("You are a phone agent.")
            .history(&history, 10)
            .instruction("Reply to the caller.")
            .build();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(messages[3].content, "Reply to the caller.");
    }

    #[test]
    fn test_extract_json_plain() {
        let value = extract_json_object(r#"{"yearly_income": 60000}"#).unwrap();
        assert_eq!(value["yearly_income"], 60000);
    }

    #[test]
    fn test_extract_json_fenced() {
        let response = "Sure, here you go:\n```json\n{\"a\": \"b {not a brace}\"}\n```";
        let value = extract_json_object(response).unwrap();
        assert_eq!(value["a"], "b {not a brace}");
    }

    #[test]
    fn test_extract_json_none() {
        assert!(extract_json_object("no json here").is_none());
    }
}
