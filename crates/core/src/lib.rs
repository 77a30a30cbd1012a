//! Core traits and types for the callflow voice-conversation engine
//!
//! This crate provides foundational types used across all other crates:
//! - Transcript events from the speech transport
//! - Conversation history
//! - Untyped session variable values
//! - Template substitution

pub mod history;
pub mod template;
pub mod transcript;
pub mod value;

pub use history::{ConversationHistory, HistoryEntry, Speaker};
pub use transcript::{TranscriptEvent, Utterance};
pub use value::VarValue;
