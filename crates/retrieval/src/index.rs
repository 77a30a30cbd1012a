//! In-memory vector index
//!
//! Reference material is chunked and embedded at load time; queries do a
//! cosine nearest-neighbor scan. Sources carry a human-authored description
//! used by the answering prompt to pick which source to quote from.

use serde::{Deserialize, Serialize};

use crate::chunker::DocumentChunker;
use crate::embed::{cosine_similarity, Embedder};
use crate::RetrievalError;

/// An indexed source of reference material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSource {
    /// Source label, e.g. "pricing-faq"
    pub label: String,
    /// Human-authored description of what this source answers
    pub description: String,
    /// Raw document text
    pub text: String,
}

/// One retrieved chunk with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnippet {
    /// Chunk text
    pub text: String,
    /// Label of the source it came from
    pub source: String,
    /// Source description, for source selection in the prompt
    pub source_description: String,
    /// Cosine similarity to the query
    pub score: f32,
}

struct IndexedChunk {
    text: String,
    source_idx: usize,
    vector: Vec<f32>,
}

/// Flat cosine-scan index over pre-embedded chunks.
pub struct VectorIndex {
    sources: Vec<KnowledgeSource>,
    chunks: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Build the index: chunk every source and embed every chunk.
    pub async fn build(
        sources: Vec<KnowledgeSource>,
        chunker: &DocumentChunker,
        embedder: &dyn Embedder,
    ) -> Result<Self, RetrievalError> {
        let mut chunks = Vec::new();

        for (source_idx, source) in sources.iter().enumerate() {
            for text in chunker.chunk(&source.text) {
                let vector = embedder.embed(&text).await?;
                chunks.push(IndexedChunk {
                    text,
                    source_idx,
                    vector,
                });
            }
        }

        tracing::info!(
            sources = sources.len(),
            chunks = chunks.len(),
            "knowledge index built"
        );

        Ok(Self { sources, chunks })
    }

    /// An index with no content; every search returns empty.
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// Top-k nearest chunks by cosine similarity.
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Vec<ContextSnippet> {
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .map(|chunk| (cosine_similarity(query_vector, &chunk.vector), chunk))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(top_k)
            .filter(|(score, _)| *score > 0.0)
            .map(|(score, chunk)| {
                let source = &self.sources[chunk.source_idx];
                ContextSnippet {
                    text: chunk.text.clone(),
                    source: source.label.clone(),
                    source_description: source.description.clone(),
                    score,
                }
            })
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
