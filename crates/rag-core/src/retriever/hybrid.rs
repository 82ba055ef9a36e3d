//! Hybrid fusion retriever (spec.md §4.6): combines a dense vector
//! retriever and a keyword retriever via RRF, weighted-sum, or z-score
//! fusion.
//!
//! The rank-fusion crate the teacher's facade names (`rank-fusion`) is not
//! present in the retrieved pack, so the fusion formulas are grounded on
//! `varun29ankuS-shodhRAG`'s `search/hybrid.rs` (`reciprocal_rank_fusion`,
//! `weighted_fusion`), generalized from that crate's `(String, f32)` id/score
//! pairs to this engine's chunk-id keying, id tie-breaking, and an added
//! z-score variant.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::{Chunk, RetrievalResult};
use crate::error::Result;
use crate::filter::FilterCondition;
use crate::retriever::{guard, sort_by_score_then_id, Retriever};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionMethod {
    Rrf { k: u32 },
    WeightedSum,
    ZScore,
}

impl Default for FusionMethod {
    fn default() -> Self {
        FusionMethod::Rrf { k: 60 }
    }
}

pub struct HybridRetriever {
    vector: Arc<dyn Retriever>,
    keyword: Arc<dyn Retriever>,
    method: FusionMethod,
    vector_weight: f32,
}

impl HybridRetriever {
    pub fn new(vector: Arc<dyn Retriever>, keyword: Arc<dyn Retriever>, method: FusionMethod, vector_weight: f32) -> Self {
        Self { vector, keyword, method, vector_weight: vector_weight.clamp(0.0, 1.0) }
    }
}

/// Min-max normalizes `scores` to `[0, 1]`; if every score is equal, every
/// entry collapses to `1.0` rather than dividing by a zero range.
fn min_max_normalize(scores: &[(String, f32)]) -> HashMap<String, f32> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let max = scores.iter().map(|(_, s)| *s).fold(f32::MIN, f32::max);
    let min = scores.iter().map(|(_, s)| *s).fold(f32::MAX, f32::min);
    if (max - min).abs() < 1e-9 {
        return scores.iter().map(|(id, _)| (id.clone(), 1.0)).collect();
    }
    let range = max - min;
    scores.iter().map(|(id, s)| (id.clone(), (s - min) / range)).collect()
}

/// Per-list z-score normalization; if the list has zero variance every
/// entry normalizes to `0.0` (no information to contribute).
fn z_normalize(scores: &[(String, f32)]) -> HashMap<String, f32> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let n = scores.len() as f32;
    let mean = scores.iter().map(|(_, s)| *s).sum::<f32>() / n;
    let variance = scores.iter().map(|(_, s)| (*s - mean).powi(2)).sum::<f32>() / n;
    let stddev = variance.sqrt();
    if stddev < 1e-9 {
        return scores.iter().map(|(id, _)| (id.clone(), 0.0)).collect();
    }
    scores.iter().map(|(id, s)| (id.clone(), (*s - mean) / stddev)).collect()
}

fn rrf_contributions(ranked_ids: &[String], k: u32) -> HashMap<String, f32> {
    ranked_ids
        .iter()
        .enumerate()
        .map(|(rank, id)| (id.clone(), 1.0 / (k as f32 + rank as f32 + 1.0)))
        .collect()
}

fn fuse(
    vector_results: &[RetrievalResult],
    keyword_results: &[RetrievalResult],
    method: FusionMethod,
    vector_weight: f32,
) -> Vec<(String, f32)> {
    let vector_pairs: Vec<(String, f32)> = vector_results.iter().map(|r| (r.chunk.id.clone(), r.score)).collect();
    let keyword_pairs: Vec<(String, f32)> = keyword_results.iter().map(|r| (r.chunk.id.clone(), r.score)).collect();

    let keyword_weight = 1.0 - vector_weight;
    let (vec_contrib, kw_contrib) = match method {
        FusionMethod::Rrf { k } => {
            let vector_ids: Vec<String> = vector_pairs.iter().map(|(id, _)| id.clone()).collect();
            let keyword_ids: Vec<String> = keyword_pairs.iter().map(|(id, _)| id.clone()).collect();
            (rrf_contributions(&vector_ids, k), rrf_contributions(&keyword_ids, k))
        }
        FusionMethod::WeightedSum => (min_max_normalize(&vector_pairs), min_max_normalize(&keyword_pairs)),
        FusionMethod::ZScore => (z_normalize(&vector_pairs), z_normalize(&keyword_pairs)),
    };

    let mut fused: HashMap<String, f32> = HashMap::new();
    for (id, score) in vec_contrib {
        *fused.entry(id).or_insert(0.0) += vector_weight * score;
    }
    for (id, score) in kw_contrib {
        *fused.entry(id).or_insert(0.0) += keyword_weight * score;
    }

    let mut merged: Vec<(String, f32)> = fused.into_iter().collect();
    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    merged
}

#[async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&FilterCondition>,
    ) -> Result<Vec<RetrievalResult>> {
        if let Some(early) = guard(query, limit) {
            return early;
        }
        let fetch_limit = 2 * limit;
        let (vector_results, keyword_results) = tokio::try_join!(
            self.vector.retrieve(query, fetch_limit, filter),
            self.keyword.retrieve(query, fetch_limit, filter),
        )?;

        let chunks: HashMap<String, Chunk> = vector_results
            .iter()
            .chain(keyword_results.iter())
            .map(|r| (r.chunk.id.clone(), r.chunk.clone()))
            .collect();

        let fused = fuse(&vector_results, &keyword_results, self.method, self.vector_weight);
        let mut results: Vec<RetrievalResult> = fused
            .into_iter()
            .filter_map(|(id, score)| chunks.get(&id).map(|c| RetrievalResult::new(c.clone(), score).with_metadata("fusionMethod", fusion_method_name(self.method).into())))
            .collect();
        sort_by_score_then_id(&mut results);
        results.truncate(limit);
        Ok(results)
    }
}

fn fusion_method_name(method: FusionMethod) -> &'static str {
    match method {
        FusionMethod::Rrf { .. } => "rrf",
        FusionMethod::WeightedSum => "weighted_sum",
        FusionMethod::ZScore => "z_score",
    }
}
