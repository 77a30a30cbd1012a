//! Language-model boundary
//!
//! Everything that talks to a language model goes through the traits in this
//! crate: response generation, transition-condition judging and variable
//! extraction prompts. The backend itself is an external collaborator; only
//! the request/response contract lives here.

pub mod condition;
pub mod model;
pub mod prompt;

pub use condition::{ConditionEvaluator, KeywordConditionEvaluator, LlmConditionEvaluator};
pub use model::{ChatRequest, LanguageModel, ScriptedModel, TimeoutModel};
pub use prompt::{extract_json_object, Message, PromptBuilder, Role};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Model call timed out after {0}s")]
    Timeout(u64),

    #[error("Unparseable model response: {0}")]
    BadResponse(String),
}
