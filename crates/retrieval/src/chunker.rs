//! Document chunking
//!
//! Splits reference material into overlapping chunks before embedding.
//! Token counts are approximated by whitespace words; the target sizes are
//! coarse enough that the approximation does not matter.

/// Splits documents into word-bounded chunks with overlap.
#[derive(Debug, Clone)]
pub struct DocumentChunker {
    /// Target chunk size in tokens
    chunk_tokens: usize,
    /// Overlap carried into the next chunk
    overlap_tokens: usize,
}

impl DocumentChunker {
    pub fn from_settings(settings: &callflow_config::RetrievalSettings) -> Self {
        Self::new(settings.chunk_tokens, settings.chunk_overlap_tokens)
    }

    pub fn new(chunk_tokens: usize, overlap_tokens: usize) -> Self {
        // Overlap must leave forward progress.
        let overlap_tokens = overlap_tokens.min(chunk_tokens.saturating_sub(1));
        Self {
            chunk_tokens: chunk_tokens.max(1),
            overlap_tokens,
        }
    }

    /// Split `text` into chunks. Short documents yield a single chunk.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        if words.len() <= self.chunk_tokens {
            return vec![words.join(" ")];
        }

        let step = self.chunk_tokens - self.overlap_tokens;
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < words.len() {
            let end = (start + self.chunk_tokens).min(words.len());
            chunks.push(words[start..end].join(" "));
            if end == words.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}

impl Default for DocumentChunker {
    fn default() -> Self {
        Self::new(400, 40)
    }
}
