//! Variable Extraction Engine
//!
//! Pulls structured values out of free-form caller speech, looking across the
//! recent conversation window rather than only the newest utterance: callers
//! state information turns before they confirm it ("yeah" after "tomorrow at
//! 7pm" two turns earlier).

pub mod engine;
pub mod spec;
pub mod transform;

pub use engine::{ExtractionOutcome, VariableExtractor};
pub use spec::VariableSpec;
pub use transform::{DerivedVariable, TransformOp};

use thiserror::Error;

/// Extraction errors
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("LLM error: {0}")]
    Llm(#[from] callflow_llm::LlmError),

    #[error("Unparseable extraction response: {0}")]
    BadResponse(String),
}
