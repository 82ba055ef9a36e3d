//! Dense vector retriever: embed the query, search the store, optionally
//! drop results below a similarity threshold.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::RetrievalResult;
use crate::error::Result;
use crate::filter::FilterCondition;
use crate::providers::EmbeddingProvider;
use crate::retriever::{guard, Retriever};
use crate::store::VectorStore;

pub struct VectorRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    /// Results scoring below this cosine similarity are dropped.
    score_threshold: Option<f32>,
}

impl VectorRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store, score_threshold: None }
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&FilterCondition>,
    ) -> Result<Vec<RetrievalResult>> {
        if let Some(early) = guard(query, limit) {
            return early;
        }
        let query_embedding = self.embedder.embed(query).await?;
        let mut results = self.store.search(&query_embedding, limit, filter).await?;
        if let Some(threshold) = self.score_threshold {
            results.retain(|r| r.score >= threshold);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Chunk, ChunkMetadata, Embedding};
    use crate::store::memory::InMemoryVectorStore;
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            self.0.len()
        }
        fn max_tokens_per_request(&self) -> usize {
            8192
        }
        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Ok(Embedding::new(self.0.clone()))
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts.iter().map(|_| Embedding::new(self.0.clone())).collect())
        }
    }

    fn chunk(id: &str, vals: Vec<f32>) -> Chunk {
        let meta = ChunkMetadata::new("doc1", 0, 0, 10);
        Chunk::new(id, "content", meta).with_embedding(Embedding::new(vals))
    }

    #[tokio::test]
    async fn retrieve_embeds_query_and_searches_store() {
        let store = Arc::new(InMemoryVectorStore::new());
        store
            .add(vec![chunk("a", vec![1.0, 0.0]), chunk("b", vec![0.0, 1.0])])
            .await
            .unwrap();
        let retriever = VectorRetriever::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), store);

        let results = retriever.retrieve("anything", 1, None).await.unwrap();
        assert_eq!(results[0].chunk.id, "a");
    }

    #[tokio::test]
    async fn blank_query_returns_empty() {
        let store = Arc::new(InMemoryVectorStore::new());
        store.add(vec![chunk("a", vec![1.0, 0.0])]).await.unwrap();
        let retriever = VectorRetriever::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), store);
        let results = retriever.retrieve("   ", 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn score_threshold_drops_weak_matches() {
        let store = Arc::new(InMemoryVectorStore::new());
        store
            .add(vec![chunk("a", vec![1.0, 0.0]), chunk("b", vec![0.0, 1.0])])
            .await
            .unwrap();
        let retriever = VectorRetriever::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), store)
            .with_score_threshold(0.5);
        let results = retriever.retrieve("anything", 2, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "a");
    }
}
