//! Reranking retriever (spec.md §4.6): fetches a wider candidate set from a
//! base retriever and hands it to an external [`Reranker`] (typically a
//! cross-encoder) for final ordering.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::RetrievalResult;
use crate::error::Result;
use crate::filter::FilterCondition;
use crate::providers::Reranker;
use crate::retriever::{guard, Retriever};

pub struct RerankingRetriever {
    base: Arc<dyn Retriever>,
    reranker: Arc<dyn Reranker>,
    /// Candidates fetched before reranking; defaults to `3 * limit`.
    initial_limit: Option<usize>,
}

impl RerankingRetriever {
    pub fn new(base: Arc<dyn Retriever>, reranker: Arc<dyn Reranker>) -> Self {
        Self { base, reranker, initial_limit: None }
    }

    pub fn with_initial_limit(mut self, initial_limit: usize) -> Self {
        self.initial_limit = Some(initial_limit);
        self
    }
}

#[async_trait]
impl Retriever for RerankingRetriever {
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&FilterCondition>,
    ) -> Result<Vec<RetrievalResult>> {
        if let Some(early) = guard(query, limit) {
            return early;
        }
        let fetch_limit = self.initial_limit.unwrap_or(3 * limit);
        let candidates = self.base.retrieve(query, fetch_limit, filter).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut reranked = self.reranker.rerank(query, candidates).await?;
        reranked.truncate(limit);
        Ok(reranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Chunk, ChunkMetadata};
    use std::sync::Mutex;

    struct ScriptedRetriever(Vec<RetrievalResult>);

    #[async_trait]
    impl Retriever for ScriptedRetriever {
        async fn retrieve(&self, _query: &str, limit: usize, _filter: Option<&FilterCondition>) -> Result<Vec<RetrievalResult>> {
            let mut out = self.0.clone();
            out.truncate(limit);
            Ok(out)
        }
    }

    struct ReverseReranker(Mutex<Option<String>>);

    #[async_trait]
    impl Reranker for ReverseReranker {
        async fn rerank(&self, query: &str, mut results: Vec<RetrievalResult>) -> Result<Vec<RetrievalResult>> {
            *self.0.lock().unwrap() = Some(query.to_string());
            results.reverse();
            Ok(results)
        }
    }

    fn result(id: &str, score: f32) -> RetrievalResult {
        RetrievalResult::new(Chunk::new(id, "content", ChunkMetadata::new("doc1", 0, 0, 1)), score)
    }

    #[tokio::test]
    async fn reranker_order_is_authoritative() {
        let base = Arc::new(ScriptedRetriever(vec![result("a", 0.9), result("b", 0.8), result("c", 0.7)]));
        let reranker = Arc::new(ReverseReranker(Mutex::new(None)));
        let retriever = RerankingRetriever::new(base, reranker).with_initial_limit(3);

        let results = retriever.retrieve("query", 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, "c");
        assert_eq!(results[1].chunk.id, "b");
    }

    #[tokio::test]
    async fn default_initial_limit_is_triple() {
        let base = Arc::new(ScriptedRetriever((0..10).map(|i| result(&format!("c{i}"), 1.0)).collect()));
        let reranker = Arc::new(ReverseReranker(Mutex::new(None)));
        let retriever = RerankingRetriever::new(base, reranker);
        let results = retriever.retrieve("query", 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
