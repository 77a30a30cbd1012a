//! Knowledge Retrieval Router
//!
//! Two-stage routing for caller questions:
//! 1. A sub-millisecond pattern classifier separates small-talk from
//!    potentially factual utterances. Small-talk is the dominant path and
//!    short-circuits with no context.
//! 2. Factual utterances are embedded, checked against a semantic cache of
//!    prior queries, and only on a miss searched against the pre-chunked,
//!    pre-embedded index.

pub mod cache;
pub mod chunker;
pub mod classifier;
pub mod embed;
pub mod index;
pub mod router;

pub use cache::{CacheStats, SemanticCache};
pub use chunker::DocumentChunker;
pub use classifier::SmallTalkClassifier;
pub use embed::{cosine_similarity, Embedder, HashingEmbedder};
pub use index::{ContextSnippet, KnowledgeSource, VectorIndex};
pub use router::{grounding_instruction, KnowledgeRouter, RouterConfig};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding call timed out after {0}s")]
    Timeout(u64),

    #[error("Index error: {0}")]
    Index(String),
}
