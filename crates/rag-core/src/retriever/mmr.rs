//! Maximal Marginal Relevance diversification (spec.md §4.6).
//!
//! Fetches `limit * candidate_multiplier` candidates from a base retriever,
//! then iteratively selects the candidate maximizing
//! `lambda * relevance - (1 - lambda) * max_similarity_to_selected`, using
//! [`crate::batch::mmr_scores`] for the per-round arithmetic.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::{Embedding, RetrievalResult};
use crate::error::{RagError, Result};
use crate::filter::FilterCondition;
use crate::providers::EmbeddingProvider;
use crate::retriever::{guard, Retriever};
use crate::vector::cosine;

pub struct MmrRetriever {
    base: Arc<dyn Retriever>,
    embedder: Arc<dyn EmbeddingProvider>,
    lambda: f32,
    candidate_multiplier: usize,
}

impl MmrRetriever {
    pub fn new(base: Arc<dyn Retriever>, embedder: Arc<dyn EmbeddingProvider>, lambda: f32, candidate_multiplier: usize) -> Result<Self> {
        if !(0.0..=1.0).contains(&lambda) {
            return Err(RagError::InvalidConfiguration("mmr lambda must be in [0, 1]".into()));
        }
        if candidate_multiplier < 2 {
            return Err(RagError::InvalidConfiguration("mmr candidate_multiplier must be >= 2".into()));
        }
        Ok(Self { base, embedder, lambda, candidate_multiplier })
    }
}

#[async_trait]
impl Retriever for MmrRetriever {
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&FilterCondition>,
    ) -> Result<Vec<RetrievalResult>> {
        if let Some(early) = guard(query, limit) {
            return early;
        }
        let fetch_limit = limit * self.candidate_multiplier;
        let candidates = self.base.retrieve(query, fetch_limit, filter).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding: Embedding = self.embedder.embed(query).await?;
        let candidate_embeddings: Vec<Option<Embedding>> =
            candidates.iter().map(|r| r.chunk.embedding.clone()).collect();

        let relevance: Vec<f32> = candidate_embeddings
            .iter()
            .map(|e| e.as_ref().map(|e| cosine(&query_embedding.values, &e.values)).unwrap_or(0.0))
            .collect();

        let mut selected: Vec<(usize, f32)> = Vec::new();
        let mut remaining: Vec<usize> = (0..candidates.len()).collect();

        while !remaining.is_empty() && selected.len() < limit {
            let mut best_idx = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for (pos, &idx) in remaining.iter().enumerate() {
                let max_sim = selected
                    .iter()
                    .map(|&(s, _)| match (&candidate_embeddings[idx], &candidate_embeddings[s]) {
                        (Some(a), Some(b)) => cosine(&a.values, &b.values),
                        _ => 0.0,
                    })
                    .fold(0.0f32, f32::max);
                let mmr = self.lambda * relevance[idx] - (1.0 - self.lambda) * max_sim;
                if mmr > best_score {
                    best_score = mmr;
                    best_idx = pos;
                }
            }
            let chosen = remaining.remove(best_idx);
            selected.push((chosen, best_score));
        }

        Ok(selected
            .into_iter()
            .map(|(idx, mmr_score)| {
                let mut result = candidates[idx].clone();
                result.score = mmr_score;
                result.metadata.insert("mmrScore".to_string(), (mmr_score as f64).into());
                result
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Chunk, ChunkMetadata};
    use crate::retriever::vector::VectorRetriever;
    use crate::store::memory::InMemoryVectorStore;
    use std::sync::Arc;

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
        Chunk::new(id, "content", ChunkMetadata::new("doc1", 0, 0, 10)).with_embedding(Embedding::new(vals))
    }

    async fn build_mmr(lambda: f32) -> MmrRetriever {
        let store = Arc::new(InMemoryVectorStore::new());
        store
            .add(vec![
                chunk("a", vec![1.0, 0.0, 0.0]),
                chunk("b", vec![0.99, 0.01, 0.0]),
                chunk("c", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();
        let embedder = Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0]));
        let base = Arc::new(VectorRetriever::new(embedder.clone(), store));
        MmrRetriever::new(base, embedder, lambda, 3).unwrap()
    }

    #[tokio::test]
    async fn lambda_one_is_pure_relevance_order() {
        let mmr = build_mmr(1.0).await;
        let results = mmr.retrieve("query", 3, None).await.unwrap();
        assert_eq!(results[0].chunk.id, "a");
        assert_eq!(results[1].chunk.id, "b");
        assert_eq!(results[2].chunk.id, "c");
    }

    #[tokio::test]
    async fn scenario_s4_second_pick_favors_diversity() {
        let mmr = build_mmr(0.5).await;
        let results = mmr.retrieve("query", 2, None).await.unwrap();
        assert_eq!(results[0].chunk.id, "a");
        assert_eq!(results[1].chunk.id, "c");
    }

    #[tokio::test]
    async fn emitted_score_is_the_mmr_value_not_raw_relevance() {
        let mmr = build_mmr(0.5).await;
        let results = mmr.retrieve("query", 2, None).await.unwrap();
        // first pick has no prior selections, so max_sim = 0 and mmr == lambda * relevance
        assert!((results[0].score - 0.5 * 1.0).abs() < 1e-4);
        assert!((results[0].metadata["mmrScore"].as_f64().unwrap() - results[0].score as f64).abs() < 1e-4);
        // second pick's mmr score must reflect the diversity penalty, so it cannot
        // equal its raw lambda-scaled relevance (0.5 * cosine(query, c) == 0.0)
        assert!(results[1].score < 0.0);
        assert!((results[1].metadata["mmrScore"].as_f64().unwrap() - results[1].score as f64).abs() < 1e-4);
    }

    #[test]
    fn invalid_lambda_rejected() {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(FixedEmbedder(vec![1.0]));
        let base = Arc::new(VectorRetriever::new(embedder.clone(), store));
        assert!(MmrRetriever::new(base, embedder, 1.5, 3).is_err());
    }
}
