//! The retrieval router

use std::sync::Arc;
use std::time::Duration;

use callflow_config::RetrievalSettings;

use crate::cache::SemanticCache;
use crate::classifier::SmallTalkClassifier;
use crate::embed::Embedder;
use crate::index::{ContextSnippet, VectorIndex};
use crate::RetrievalError;

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Chunks returned per retrieval
    pub top_k: usize,
    /// Cosine similarity for a semantic cache hit
    pub cache_threshold: f32,
    /// Semantic cache capacity
    pub cache_capacity: usize,
    /// Hard deadline on each embedding call
    pub embed_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            cache_threshold: 0.95,
            cache_capacity: 2048,
            embed_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&RetrievalSettings> for RouterConfig {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            top_k: settings.top_k,
            cache_threshold: settings.cache_similarity_threshold,
            cache_capacity: settings.cache_capacity,
            embed_timeout: Duration::from_secs(settings.embed_timeout_secs),
        }
    }
}

/// Two-stage knowledge retrieval router.
pub struct KnowledgeRouter {
    classifier: SmallTalkClassifier,
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    cache: SemanticCache,
    config: RouterConfig,
}

impl KnowledgeRouter {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<VectorIndex>, config: RouterConfig) -> Self {
        Self {
            classifier: SmallTalkClassifier::new(),
            embedder,
            cache: SemanticCache::new(config.cache_capacity, config.cache_threshold),
            index,
            config,
        }
    }

    /// Retrieve context for an utterance, or nothing for small-talk.
    pub async fn maybe_retrieve(
        &self,
        utterance: &str,
    ) -> Result<Vec<ContextSnippet>, RetrievalError> {
        // Stage 1: the dominant path, pattern-only.
        if self.classifier.is_small_talk(utterance) {
            return Ok(Vec::new());
        }

        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        // Stage 2: embed, consult the cache, then search.
        let query_vector =
            tokio::time::timeout(self.config.embed_timeout, self.embedder.embed(utterance))
                .await
                .map_err(|_| RetrievalError::Timeout(self.config.embed_timeout.as_secs()))??;

        if let Some(snippets) = self.cache.get(&query_vector) {
            return Ok(snippets);
        }

        let snippets = self.index.search(&query_vector, self.config.top_k);
        self.cache.insert(query_vector, snippets.clone());

        tracing::debug!(
            utterance = %utterance,
            snippets = snippets.len(),
            "knowledge retrieval performed"
        );

        Ok(snippets)
    }

    /// Cache statistics
    pub fn cache_stats(&self) -> &crate::cache::CacheStats {
        &self.cache.stats
    }
}

/// System-prompt instruction that pins the model to retrieved content.
///
/// Renders each snippet under its source label and description and instructs
/// the model to answer only from them, declining when nothing applies.
pub fn grounding_instruction(snippets: &[ContextSnippet]) -> String {
    let mut out = String::from(
        "Answer strictly from the reference excerpts below. Pick the source \
         whose description matches the question. If no excerpt answers the \
         question, say you do not have that information; never invent an \
         answer.\n\n",
    );

    for snippet in snippets {
        out.push_str(&format!(
            "[{}] ({})\n{}\n\n",
            snippet.source, snippet.source_description, snippet.text
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::DocumentChunker;
    use crate::embed::HashingEmbedder;
    use crate::index::KnowledgeSource;

    async fn router() -> KnowledgeRouter {
        let embedder = Arc::new(HashingEmbedder::default());
        let sources = vec![KnowledgeSource {
            label: "rates".to_string(),
            description: "interest rates".to_string(),
            text: "the standard interest rate is nine percent".to_string(),
        }];
        let index = VectorIndex::build(sources, &DocumentChunker::default(), embedder.as_ref())
            .await
            .unwrap();
        KnowledgeRouter::new(embedder, Arc::new(index), RouterConfig::default())
    }

    #[tokio::test]
    async fn test_small_talk_short_circuits() {
        let router = router().await;
        let snippets = router.maybe_retrieve("hello there").await.unwrap();
        assert!(snippets.is_empty());
        // No embedding, no cache traffic
        assert_eq!(router.cache_stats().misses.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_factual_query_retrieves() {
        let router = router().await;
        let snippets = router
            .maybe_retrieve("what is the standard interest rate")
            .await
            .unwrap();
        assert!(!snippets.is_empty());
        assert_eq!(snippets[0].source, "rates");
    }

    #[tokio::test]
    async fn test_repeat_query_hits_cache() {
        let router = router().await;
        let q = "what is the standard interest rate";
        router.maybe_retrieve(q).await.unwrap();
        router.maybe_retrieve(q).await.unwrap();

        assert_eq!(router.cache_stats().hits.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_stalled_embedder_times_out() {
        struct StalledEmbedder;

        #[async_trait::async_trait]
        impl Embedder for StalledEmbedder {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(vec![0.0; 4])
            }

            fn dim(&self) -> usize {
                4
            }
        }

        let index_embedder = Arc::new(HashingEmbedder::default());
        let sources = vec![KnowledgeSource {
            label: "rates".to_string(),
            description: "interest rates".to_string(),
            text: "the standard interest rate is nine percent".to_string(),
        }];
        let index =
            VectorIndex::build(sources, &DocumentChunker::default(), index_embedder.as_ref())
                .await
                .unwrap();

        let config = RouterConfig {
            embed_timeout: Duration::from_millis(10),
            ..RouterConfig::default()
        };
        let router = KnowledgeRouter::new(Arc::new(StalledEmbedder), Arc::new(index), config);

        let result = router.maybe_retrieve("what is the interest rate").await;
        assert!(matches!(result, Err(RetrievalError::Timeout(_))));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = RetrievalSettings {
            top_k: 5,
            cache_similarity_threshold: 0.9,
            cache_capacity: 16,
            embed_timeout_secs: 2,
            ..RetrievalSettings::default()
        };

        let config = RouterConfig::from(&settings);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.cache_threshold, 0.9);
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.embed_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_grounding_instruction_renders_sources() {
        let snippets = vec![ContextSnippet {
            text: "rate is nine percent".to_string(),
            source: "rates".to_string(),
            source_description: "interest rates".to_string(),
            score: 0.9,
        }];
        let instruction = grounding_instruction(&snippets);
        assert!(instruction.contains("[rates]"));
        assert!(instruction.contains("never invent"));
    }
}
